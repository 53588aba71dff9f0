use crate::language::{
    errors::{LexError, LexErrorKind},
    span::Span,
    token::{Token, TokenKind},
};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char as nom_char, digit1},
    combinator::{opt, recognize},
    multi::many0,
    sequence::pair,
    IResult, Parser as NomParser,
};

/// Tokenizes a whole compilation unit. The returned sequence always ends
/// with an `Eof` token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).collect()
}

/// Forward-only token stream over a source string.
///
/// The lexer holds no state besides its byte offset, so a stream can be
/// restarted from any offset previously observed through [`Lexer::offset`].
#[derive(Clone, Debug)]
pub struct Lexer<'a> {
    src: &'a str,
    offset: usize,
    finished: bool,
}

fn scan_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}

fn scan_number(input: &str) -> IResult<&str, &str> {
    recognize(pair(digit1, opt(pair(nom_char('.'), digit1)))).parse(input)
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self::resume_at(src, 0)
    }

    /// An offset inside a multi-byte character snaps back to its start.
    pub fn resume_at(src: &'a str, offset: usize) -> Self {
        let mut offset = offset.min(src.len());
        while !src.is_char_boundary(offset) {
            offset -= 1;
        }
        Self {
            src,
            offset,
            finished: false,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn rest(&self) -> &'a str {
        &self.src[self.offset..]
    }

    fn current(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.offset += ch.len_utf8();
        Some(ch)
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            lexeme: self.src[start..self.offset].to_string(),
            span: Span::new(start, self.offset),
        }
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match (self.current(), self.peek()) {
                (Some(ch), _) if ch.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.current() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => self.eat_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    fn eat_block_comment(&mut self) -> Result<(), LexError> {
        let start = self.offset;
        let mut depth = 0usize;
        loop {
            match (self.current(), self.peek()) {
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.bump();
                    self.bump();
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => {
                    return Err(LexError::new(
                        LexErrorKind::UnterminatedComment,
                        Span::new(start, self.offset),
                    ));
                }
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia()?;
        let start = self.offset;
        let Some(ch) = self.current() else {
            return Ok(self.token(TokenKind::Eof, start));
        };

        if ch.is_ascii_alphabetic() || ch == '_' {
            return Ok(self.lex_word(start));
        }
        if ch.is_ascii_digit() {
            return self.lex_number(start);
        }
        match ch {
            '"' => self.lex_string(start),
            '\'' => self.lex_char(start),
            '@' => {
                self.bump();
                if let Ok((_, name)) = scan_identifier(self.rest()) {
                    self.offset += name.len();
                    Ok(self.token(TokenKind::MutIdentifier(name.to_string()), start))
                } else {
                    Ok(self.token(TokenKind::At, start))
                }
            }
            _ => self.lex_symbol(start, ch),
        }
    }

    fn lex_word(&mut self, start: usize) -> Token {
        let word = match scan_identifier(self.rest()) {
            Ok((_, word)) => word,
            Err(_) => &self.rest()[..1],
        };
        self.offset += word.len();
        let kind =
            TokenKind::keyword(word).unwrap_or_else(|| TokenKind::Identifier(word.to_string()));
        self.token(kind, start)
    }

    fn lex_number(&mut self, start: usize) -> Result<Token, LexError> {
        let text = match scan_number(self.rest()) {
            Ok((_, text)) => text,
            Err(_) => {
                return Err(LexError::new(
                    LexErrorKind::InvalidNumber,
                    Span::new(start, start + 1),
                ))
            }
        };
        self.offset += text.len();
        let is_float = text.contains('.');
        // `1.2.3` is rejected outright instead of lexing as `1.2` `.` `3`.
        if is_float && self.current() == Some('.') && self.peek().is_some_and(|c| c.is_ascii_digit())
        {
            return Err(LexError::new(
                LexErrorKind::InvalidNumber,
                Span::new(start, self.offset),
            ));
        }
        let invalid = || LexError::new(LexErrorKind::InvalidNumber, Span::new(start, start + text.len()));
        let kind = if is_float {
            TokenKind::Float(text.parse::<f64>().map_err(|_| invalid())?)
        } else {
            TokenKind::Integer(text.parse::<i64>().map_err(|_| invalid())?)
        };
        Ok(self.token(kind, start))
    }

    fn lex_escape(&mut self) -> Option<char> {
        let escaped = self.bump()?;
        Some(match escaped {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            other => other,
        })
    }

    fn lex_string(&mut self, start: usize) -> Result<Token, LexError> {
        self.bump();
        let mut value = String::new();
        while let Some(ch) = self.bump() {
            match ch {
                '"' => return Ok(self.token(TokenKind::String(value), start)),
                '\\' => match self.lex_escape() {
                    Some(escaped) => value.push(escaped),
                    None => break,
                },
                _ => value.push(ch),
            }
        }
        Err(LexError::new(
            LexErrorKind::UnterminatedString,
            Span::new(start, self.offset),
        ))
    }

    fn lex_char(&mut self, start: usize) -> Result<Token, LexError> {
        let unterminated =
            |end: usize| LexError::new(LexErrorKind::UnterminatedChar, Span::new(start, end));
        self.bump();
        let value = match self.bump() {
            Some('\\') => self.lex_escape(),
            Some('\'') | None => None,
            other => other,
        };
        let Some(value) = value else {
            return Err(unterminated(self.offset));
        };
        if self.bump() != Some('\'') {
            return Err(unterminated(self.offset));
        }
        Ok(self.token(TokenKind::Char(value), start))
    }

    fn lex_symbol(&mut self, start: usize, ch: char) -> Result<Token, LexError> {
        self.bump();
        let next = self.current();
        let (kind, extra) = match (ch, next) {
            (':', Some(':')) => (TokenKind::ColonColon, 1),
            ('-', Some('>')) => (TokenKind::Arrow, 1),
            ('.', Some('.')) => {
                self.bump();
                if self.current() == Some('=') {
                    (TokenKind::DotDotEq, 1)
                } else {
                    (TokenKind::DotDot, 0)
                }
            }
            ('=', Some('=')) => (TokenKind::EqEq, 1),
            ('!', Some('=')) => (TokenKind::BangEq, 1),
            ('<', Some('=')) => (TokenKind::LtEq, 1),
            ('>', Some('=')) => (TokenKind::GtEq, 1),
            ('+', Some('=')) => (TokenKind::PlusEq, 1),
            ('-', Some('=')) => (TokenKind::MinusEq, 1),
            ('*', Some('=')) => (TokenKind::StarEq, 1),
            ('/', Some('=')) => (TokenKind::SlashEq, 1),
            ('%', Some('=')) => (TokenKind::PercentEq, 1),
            ('&', Some('@')) => (TokenKind::AmpersandAt, 1),
            (':', _) => (TokenKind::Colon, 0),
            ('-', _) => (TokenKind::Minus, 0),
            ('.', _) => (TokenKind::Dot, 0),
            ('=', _) => (TokenKind::Eq, 0),
            ('<', _) => (TokenKind::Lt, 0),
            ('>', _) => (TokenKind::Gt, 0),
            ('+', _) => (TokenKind::Plus, 0),
            ('*', _) => (TokenKind::Star, 0),
            ('/', _) => (TokenKind::Slash, 0),
            ('%', _) => (TokenKind::Percent, 0),
            ('&', _) => (TokenKind::Ampersand, 0),
            (',', _) => (TokenKind::Comma, 0),
            (';', _) => (TokenKind::Semi, 0),
            ('(', _) => (TokenKind::LParen, 0),
            (')', _) => (TokenKind::RParen, 0),
            ('{', _) => (TokenKind::LBrace, 0),
            ('}', _) => (TokenKind::RBrace, 0),
            ('[', _) => (TokenKind::LBracket, 0),
            (']', _) => (TokenKind::RBracket, 0),
            (other, _) => {
                return Err(LexError::new(
                    LexErrorKind::InvalidCharacter(other),
                    Span::new(start, self.offset),
                ))
            }
        };
        for _ in 0..extra {
            self.bump();
        }
        Ok(self.token(kind, start))
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_token();
        match &result {
            Ok(token) if token.kind == TokenKind::Eof => self.finished = true,
            Err(_) => self.finished = true,
            Ok(_) => {}
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("lexing failed")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn keywords_are_reserved() {
        assert_eq!(
            kinds("break else end false fn for if in loop patch record return true union when while"),
            vec![
                TokenKind::Break,
                TokenKind::Else,
                TokenKind::End,
                TokenKind::False,
                TokenKind::Fn,
                TokenKind::For,
                TokenKind::If,
                TokenKind::In,
                TokenKind::Loop,
                TokenKind::Patch,
                TokenKind::Record,
                TokenKind::Return,
                TokenKind::True,
                TokenKind::Union,
                TokenKind::When,
                TokenKind::While,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn two_character_operators_win_over_prefixes() {
        assert_eq!(
            kinds(":: -> .. ..= == != <= >= += -= *= /= %= &@ : - . = < > + * / % &"),
            vec![
                TokenKind::ColonColon,
                TokenKind::Arrow,
                TokenKind::DotDot,
                TokenKind::DotDotEq,
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::PlusEq,
                TokenKind::MinusEq,
                TokenKind::StarEq,
                TokenKind::SlashEq,
                TokenKind::PercentEq,
                TokenKind::AmpersandAt,
                TokenKind::Colon,
                TokenKind::Minus,
                TokenKind::Dot,
                TokenKind::Eq,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Plus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::Ampersand,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn mutable_identifiers_are_one_token() {
        assert_eq!(
            kinds("@count += 1; r = &@count;"),
            vec![
                TokenKind::MutIdentifier("count".into()),
                TokenKind::PlusEq,
                TokenKind::Integer(1),
                TokenKind::Semi,
                TokenKind::Identifier("r".into()),
                TokenKind::Eq,
                TokenKind::AmpersandAt,
                TokenKind::Identifier("count".into()),
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn ranges_do_not_become_floats() {
        assert_eq!(
            kinds("0..10 1.5"),
            vec![
                TokenKind::Integer(0),
                TokenKind::DotDot,
                TokenKind::Integer(10),
                TokenKind::Float(1.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn nested_block_comments_are_skipped() {
        assert_eq!(
            kinds("a /* outer /* inner */ still outer */ b // tail\nc"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Identifier("b".into()),
                TokenKind::Identifier("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_and_char_literals_decode_escapes() {
        assert_eq!(
            kinds(r#""a\tb" '\n' 'x'"#),
            vec![
                TokenKind::String("a\tb".into()),
                TokenKind::Char('\n'),
                TokenKind::Char('x'),
                TokenKind::Eof,
            ]
        );
    }

    #[test_case("\"open", LexErrorKind::UnterminatedString, 0 ; "unterminated string")]
    #[test_case("x /* /* */", LexErrorKind::UnterminatedComment, 2 ; "unbalanced nested comment")]
    #[test_case("x $", LexErrorKind::InvalidCharacter('$'), 2 ; "invalid character")]
    #[test_case("! x", LexErrorKind::InvalidCharacter('!'), 0 ; "lone bang")]
    #[test_case("123.45.67", LexErrorKind::InvalidNumber, 0 ; "two decimal points")]
    fn reports_lex_errors(source: &str, kind: LexErrorKind, position: usize) {
        let err = tokenize(source).expect_err("expected a lex error");
        assert_eq!(err.kind, kind);
        assert_eq!(err.position(), position);
    }

    #[test]
    fn relexing_lexemes_reproduces_kinds() {
        let source = r#"
            union result<T, E> { ok(T); err(E); }
            fn main() -> i32 {
                @total = 0;
                for i in 0..=3 { total += i * 2; }
                r = &@total;
                *r -= 1;
                label = "done";
                when result::ok(total) { ok(v): v; else: 0; }
            }
        "#;
        let tokens = tokenize(source).expect("lexing failed");
        let joined = tokens
            .iter()
            .map(|token| token.lexeme.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let relexed = tokenize(&joined).expect("re-lexing failed");
        assert_eq!(relexed.len(), tokens.len());
        for (original, again) in tokens.iter().zip(&relexed) {
            assert_eq!(original.kind, again.kind);
        }
    }

    #[test]
    fn lexer_resumes_from_saved_offset() {
        let source = "alpha beta gamma";
        let mut lexer = Lexer::new(source);
        let first = lexer.next().expect("token").expect("ok");
        assert_eq!(first.kind, TokenKind::Identifier("alpha".into()));
        let saved = lexer.offset();
        let rest: Vec<_> = lexer.map(|t| t.expect("ok").kind).collect();
        let resumed: Vec<_> = Lexer::resume_at(source, saved)
            .map(|t| t.expect("ok").kind)
            .collect();
        assert_eq!(rest, resumed);
    }

    #[test]
    fn resume_offset_snaps_to_a_char_boundary() {
        let source = "\"é\" x";
        let lexer = Lexer::resume_at(source, 2);
        assert_eq!(lexer.offset(), 1);
        assert_eq!(Lexer::resume_at(source, 99).offset(), source.len());
    }
}
