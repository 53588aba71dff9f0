use crate::language::span::Span;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    /// `@name`: a binding introduced or named with the mutability marker.
    MutIdentifier(String),
    Integer(i64),
    Float(f64),
    String(String),
    Char(char),

    And,
    Break,
    Else,
    End,
    False,
    Fn,
    For,
    If,
    In,
    Loop,
    Not,
    Or,
    Patch,
    Record,
    Return,
    True,
    Union,
    When,
    While,

    Ampersand,
    AmpersandAt,
    At,
    Eq,
    EqEq,
    BangEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    PlusEq,
    Minus,
    MinusEq,
    Star,
    StarEq,
    Slash,
    SlashEq,
    Percent,
    PercentEq,
    Dot,
    DotDot,
    DotDotEq,
    Comma,
    Colon,
    ColonColon,
    Semi,
    Arrow,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    Eof,
}

impl TokenKind {
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word {
            "and" => TokenKind::And,
            "break" => TokenKind::Break,
            "else" => TokenKind::Else,
            "end" => TokenKind::End,
            "false" => TokenKind::False,
            "fn" => TokenKind::Fn,
            "for" => TokenKind::For,
            "if" => TokenKind::If,
            "in" => TokenKind::In,
            "loop" => TokenKind::Loop,
            "not" => TokenKind::Not,
            "or" => TokenKind::Or,
            "patch" => TokenKind::Patch,
            "record" => TokenKind::Record,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "union" => TokenKind::Union,
            "when" => TokenKind::When,
            "while" => TokenKind::While,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Identifier(name) => return write!(f, "identifier `{name}`"),
            TokenKind::MutIdentifier(name) => return write!(f, "`@{name}`"),
            TokenKind::Integer(value) => return write!(f, "integer `{value}`"),
            TokenKind::Float(value) => return write!(f, "float `{value}`"),
            TokenKind::String(_) => "string literal",
            TokenKind::Char(_) => "char literal",
            TokenKind::And => "`and`",
            TokenKind::Break => "`break`",
            TokenKind::Else => "`else`",
            TokenKind::End => "`end`",
            TokenKind::False => "`false`",
            TokenKind::Fn => "`fn`",
            TokenKind::For => "`for`",
            TokenKind::If => "`if`",
            TokenKind::In => "`in`",
            TokenKind::Loop => "`loop`",
            TokenKind::Not => "`not`",
            TokenKind::Or => "`or`",
            TokenKind::Patch => "`patch`",
            TokenKind::Record => "`record`",
            TokenKind::Return => "`return`",
            TokenKind::True => "`true`",
            TokenKind::Union => "`union`",
            TokenKind::When => "`when`",
            TokenKind::While => "`while`",
            TokenKind::Ampersand => "`&`",
            TokenKind::AmpersandAt => "`&@`",
            TokenKind::At => "`@`",
            TokenKind::Eq => "`=`",
            TokenKind::EqEq => "`==`",
            TokenKind::BangEq => "`!=`",
            TokenKind::Lt => "`<`",
            TokenKind::LtEq => "`<=`",
            TokenKind::Gt => "`>`",
            TokenKind::GtEq => "`>=`",
            TokenKind::Plus => "`+`",
            TokenKind::PlusEq => "`+=`",
            TokenKind::Minus => "`-`",
            TokenKind::MinusEq => "`-=`",
            TokenKind::Star => "`*`",
            TokenKind::StarEq => "`*=`",
            TokenKind::Slash => "`/`",
            TokenKind::SlashEq => "`/=`",
            TokenKind::Percent => "`%`",
            TokenKind::PercentEq => "`%=`",
            TokenKind::Dot => "`.`",
            TokenKind::DotDot => "`..`",
            TokenKind::DotDotEq => "`..=`",
            TokenKind::Comma => "`,`",
            TokenKind::Colon => "`:`",
            TokenKind::ColonColon => "`::`",
            TokenKind::Semi => "`;`",
            TokenKind::Arrow => "`->`",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::LBrace => "`{`",
            TokenKind::RBrace => "`}`",
            TokenKind::LBracket => "`[`",
            TokenKind::RBracket => "`]`",
            TokenKind::Eof => "end of input",
        };
        f.write_str(text)
    }
}
