//! Line-oriented parser: classifies each source line by its leading
//! keyword and assembles class declarations, with a Pratt expression
//! parser for everything to the right of the keyword.

use super::{
    ast::{
        AssignOp, BinaryOp, ClassDecl, ConstDecl, DynName, Expr, FuncDecl, NamePiece, Stmt,
        StmtKind, SwitchArm, UnaryOp, VarDecl,
    },
    lexer::{Lexer, Token, TokenKind},
};
use crate::error::{ParseError, SourcePos};

/// Handler type names recognised in declarations.
const HANDLER_TYPES: &[&str] = &[
    "arqtxt", "arqmem", "arqdir", "arqlog", "arqsav", "arqprog", "arqexec", "textotxt", "textopos",
    "textovar", "textoobj", "listaobj", "listaitem", "indiceobj", "indiceitem", "nomeobj",
    "inttempo", "intexec", "intinc", "datahora", "debug", "telatxt", "socket", "serv", "prog",
];

/// Returns true when `name` (already lowercased) is a declarable type.
#[must_use]
pub fn is_type_name(name: &str) -> bool {
    if name == "real" || name == "ref" || HANDLER_TYPES.contains(&name) {
        return true;
    }
    for prefix in ["int", "txt"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
                return true;
            }
        }
    }
    false
}

/// One tokenised, non-empty source line.
#[derive(Debug)]
struct Line {
    number: u32,
    tokens: Vec<Token>,
}

impl Line {
    fn leading_keyword(&self) -> Option<String> {
        match &self.tokens.first()?.kind {
            TokenKind::Ident(name) => Some(name.to_ascii_lowercase()),
            _ => None,
        }
    }
}

/// Parses one source file into class declarations.
pub fn parse_source(file: &str, text: &str) -> Result<Vec<ClassDecl>, ParseError> {
    let lines = tokenize_lines(file, text)?;
    let mut stream = LineStream {
        file,
        lines,
        pos: 0,
    };
    let mut classes = Vec::new();
    while let Some(line) = stream.peek() {
        let Some(kw) = line.leading_keyword() else {
            return Err(stream.error_at(line.number, "expected `classe` at top level"));
        };
        if kw != "classe" {
            return Err(stream.error_at(line.number, "expected `classe` at top level"));
        }
        classes.push(parse_class(&mut stream)?);
    }
    Ok(classes)
}

fn tokenize_lines(file: &str, text: &str) -> Result<Vec<Line>, ParseError> {
    let mut lines = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let number = u32::try_from(idx).unwrap_or(u32::MAX - 1) + 1;
        let stripped = strip_comment(raw);
        if stripped.trim().is_empty() {
            continue;
        }
        let tokens = Lexer::new(file, number, stripped).tokenize()?;
        if tokens.len() > 1 {
            lines.push(Line { number, tokens });
        }
    }
    Ok(lines)
}

/// Cuts a `#` comment, respecting string literals.
fn strip_comment(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_string = !in_string,
            b'\\' if in_string => i += 1,
            b'#' if !in_string => return &raw[..i],
            _ => {}
        }
        i += 1;
    }
    raw
}

struct LineStream<'src> {
    file: &'src str,
    lines: Vec<Line>,
    pos: usize,
}

impl LineStream<'_> {
    fn peek(&self) -> Option<&Line> {
        self.lines.get(self.pos)
    }

    /// Consumes the current line, returning its index so callers can hold
    /// plain shared borrows of it.
    fn advance_line(&mut self) -> Option<usize> {
        if self.pos < self.lines.len() {
            self.pos += 1;
            Some(self.pos - 1)
        } else {
            None
        }
    }

    fn error_at(&self, line: u32, message: impl Into<String>) -> ParseError {
        ParseError {
            file: self.file.to_string(),
            pos: SourcePos { line, column: 1 },
            message: message.into(),
        }
    }
}

fn parse_class(stream: &mut LineStream<'_>) -> Result<ClassDecl, ParseError> {
    let file = stream.file.to_string();
    let header_idx = stream.advance_line().expect("caller checked the classe header");
    let header = &stream.lines[header_idx];
    let header_line = header.number;
    let mut cursor = TokenCursor::new(stream.file, header);
    cursor.advance(); // `classe`
    let name = cursor.expect_ident("class name")?;
    cursor.expect_eol()?;

    let mut class = ClassDecl {
        line: header_line,
        file,
        name,
        bases: Vec::new(),
        vars: Vec::new(),
        consts: Vec::new(),
        funcs: Vec::new(),
    };

    while let Some(line) = stream.peek() {
        let line_no = line.number;
        let Some(kw) = line.leading_keyword() else {
            return Err(stream.error_at(line_no, "expected a declaration inside the class"));
        };
        match kw.as_str() {
            "classe" => break,
            "herda" => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                cursor.advance();
                loop {
                    class.bases.push(cursor.expect_ident("base class name")?);
                    if !cursor.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                cursor.expect_eol()?;
            }
            "const" => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                cursor.advance();
                let name = cursor.expect_ident("constant name")?;
                cursor.expect(&TokenKind::Assign)?;
                let expr = cursor.parse_expr(0)?;
                cursor.expect_eol()?;
                class.consts.push(ConstDecl {
                    line: line_no,
                    name,
                    expr,
                });
            }
            "func" => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                cursor.advance();
                let name = cursor.expect_ident("function name")?;
                cursor.expect_eol()?;
                let body = parse_body(stream, &[])?.0;
                class.funcs.push(FuncDecl {
                    line: line_no,
                    name,
                    body,
                });
            }
            _ if kw == "comum" || kw == "sav" || is_type_name(&kw) => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                class.vars.extend(parse_var_decl(&mut cursor, line_no)?);
            }
            other => {
                return Err(stream.error_at(
                    line_no,
                    format!("unexpected `{other}` inside class body (statements belong in a func)"),
                ));
            }
        }
    }
    Ok(class)
}

/// Parses `[comum] [sav] tipo nome[.N] [= expr][, nome...]`.
fn parse_var_decl(cursor: &mut TokenCursor<'_>, line: u32) -> Result<Vec<VarDecl>, ParseError> {
    let mut common = false;
    let mut saved = false;
    let type_name = loop {
        let word = cursor.expect_ident("variable type")?.to_ascii_lowercase();
        match word.as_str() {
            "comum" => common = true,
            "sav" => saved = true,
            _ if is_type_name(&word) => break word,
            other => {
                return Err(cursor.error(format!("`{other}` is not a variable type")));
            }
        }
    };

    let mut decls = Vec::new();
    loop {
        let name = cursor.expect_ident("variable name")?;
        let mut array = 0u32;
        if cursor.peek_kind() == Some(&TokenKind::Dot) {
            cursor.advance();
            match cursor.peek_kind() {
                Some(TokenKind::Int(n)) if *n > 0 => {
                    array = u32::try_from(*n).map_err(|_| cursor.error("array size out of range"))?;
                    cursor.advance();
                }
                _ => return Err(cursor.error("expected array size after `.`")),
            }
        }
        let init = if cursor.eat(&TokenKind::Assign) {
            Some(cursor.parse_expr(3)?)
        } else {
            None
        };
        decls.push(VarDecl {
            line,
            name,
            type_name: type_name.clone(),
            array,
            common,
            saved,
            init,
        });
        if !cursor.eat(&TokenKind::Comma) {
            break;
        }
    }
    cursor.expect_eol()?;
    Ok(decls)
}

/// Parses statements until one of `stops` (or a class-level keyword) is
/// seen. Returns the body and the stop keyword, which is left unconsumed
/// unless it is a block-internal stop the caller will consume.
fn parse_body(
    stream: &mut LineStream<'_>,
    stops: &[&str],
) -> Result<(Vec<Stmt>, Option<String>), ParseError> {
    let mut body = Vec::new();
    while let Some(line) = stream.peek() {
        let line_no = line.number;
        let kw = line.leading_keyword();
        if let Some(kw) = &kw {
            if stops.contains(&kw.as_str()) {
                return Ok((body, Some(kw.clone())));
            }
            // `comum`/`sav` prefixes only exist on class-level declarations;
            // a bare type name inside a body stays a function local
            if matches!(kw.as_str(), "classe" | "func" | "const" | "herda" | "comum" | "sav") {
                return Ok((body, Some(kw.clone())));
            }
        }
        let kw = kw.unwrap_or_default();
        match kw.as_str() {
            "se" => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                cursor.advance();
                let cond = cursor.parse_expr(0)?;
                cursor.expect_eol()?;
                let mut arms = Vec::new();
                let mut pending_cond = Some(cond);
                loop {
                    let (arm_body, stop) = parse_body(stream, &["senao", "fimse"])?;
                    arms.push((pending_cond.take(), arm_body));
                    match stop.as_deref() {
                        Some("senao") => {
                            let idx = stream.advance_line().expect("stop keyword present");
                            let line = &stream.lines[idx];
                            let mut cursor = TokenCursor::new(stream.file, line);
                            cursor.advance();
                            if cursor.at_eol() {
                                pending_cond = None;
                            } else {
                                pending_cond = Some(cursor.parse_expr(0)?);
                                cursor.expect_eol()?;
                            }
                        }
                        Some("fimse") => {
                            let idx = stream.advance_line().expect("stop keyword present");
                            let line = &stream.lines[idx];
                            let mut cursor = TokenCursor::new(stream.file, line);
                            cursor.advance();
                            cursor.expect_eol()?;
                            break;
                        }
                        _ => {
                            return Err(stream.error_at(line_no, "`se` without matching `fimse`"));
                        }
                    }
                }
                body.push(Stmt {
                    line: line_no,
                    kind: StmtKind::If { arms },
                });
            }
            "enquanto" => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                cursor.advance();
                let cond = cursor.parse_expr(0)?;
                cursor.expect_eol()?;
                let inner = parse_block(stream, line_no, "enquanto")?;
                body.push(Stmt {
                    line: line_no,
                    kind: StmtKind::While { cond, body: inner },
                });
            }
            "epara" => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                cursor.advance();
                let init = cursor.parse_optional_until(&TokenKind::Semicolon)?;
                cursor.expect(&TokenKind::Semicolon)?;
                let cond = cursor.parse_optional_until(&TokenKind::Semicolon)?;
                cursor.expect(&TokenKind::Semicolon)?;
                let step = if cursor.at_eol() {
                    None
                } else {
                    Some(cursor.parse_expr(0)?)
                };
                cursor.expect_eol()?;
                let inner = parse_block(stream, line_no, "epara")?;
                body.push(Stmt {
                    line: line_no,
                    kind: StmtKind::For {
                        init,
                        cond,
                        step,
                        body: inner,
                    },
                });
            }
            "paracada" => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                cursor.advance();
                let var = cursor.expect_ident("loop variable")?;
                let em = cursor.expect_ident("`em`")?;
                if !em.eq_ignore_ascii_case("em") {
                    return Err(cursor.error("expected `em` after the loop variable"));
                }
                let seq = cursor.parse_expr(0)?;
                cursor.expect_eol()?;
                let inner = parse_block(stream, line_no, "paracada")?;
                body.push(Stmt {
                    line: line_no,
                    kind: StmtKind::ForEach {
                        var,
                        seq,
                        body: inner,
                    },
                });
            }
            "casovar" => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                cursor.advance();
                let value = cursor.parse_expr(0)?;
                cursor.expect_eol()?;
                let (mut arms, mut default) = (Vec::new(), None);
                // skip to the first arm keyword
                let (lead, stop) = parse_body(stream, &["caso", "padrao", "efim"])?;
                if !lead.is_empty() {
                    return Err(stream.error_at(line_no, "statements before the first `caso`"));
                }
                let mut stop = stop;
                loop {
                    match stop.as_deref() {
                        Some("caso") => {
                            let idx = stream.advance_line().expect("stop keyword present");
                            let line = &stream.lines[idx];
                            let mut cursor = TokenCursor::new(stream.file, line);
                            cursor.advance();
                            let mut labels = vec![cursor.parse_expr(3)?];
                            while cursor.eat(&TokenKind::Comma) {
                                labels.push(cursor.parse_expr(3)?);
                            }
                            cursor.expect_eol()?;
                            let (arm_body, next_stop) =
                                parse_body(stream, &["caso", "padrao", "efim"])?;
                            arms.push(SwitchArm {
                                labels,
                                body: arm_body,
                            });
                            stop = next_stop;
                        }
                        Some("padrao") => {
                            let idx = stream.advance_line().expect("stop keyword present");
                            let line = &stream.lines[idx];
                            let mut cursor = TokenCursor::new(stream.file, line);
                            cursor.advance();
                            cursor.expect_eol()?;
                            let (arm_body, next_stop) = parse_body(stream, &["caso", "efim"])?;
                            default = Some(arm_body);
                            stop = next_stop;
                        }
                        Some("efim") => {
                            let idx = stream.advance_line().expect("stop keyword present");
                            let line = &stream.lines[idx];
                            let mut cursor = TokenCursor::new(stream.file, line);
                            cursor.advance();
                            cursor.expect_eol()?;
                            break;
                        }
                        _ => {
                            return Err(
                                stream.error_at(line_no, "`casovar` without matching `efim`")
                            );
                        }
                    }
                }
                body.push(Stmt {
                    line: line_no,
                    kind: StmtKind::Switch {
                        value,
                        arms,
                        default,
                    },
                });
            }
            "sair" | "continuar" => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                cursor.advance();
                let mut levels = 1u8;
                if let Some(TokenKind::Int(n)) = cursor.peek_kind() {
                    levels = u8::try_from(*n).map_err(|_| cursor.error("loop depth out of range"))?;
                    if levels == 0 {
                        return Err(cursor.error("loop depth must be at least 1"));
                    }
                    cursor.advance();
                }
                let cond = if cursor.eat(&TokenKind::Comma) {
                    Some(cursor.parse_expr(0)?)
                } else {
                    None
                };
                cursor.expect_eol()?;
                let kind = if kw == "sair" {
                    StmtKind::Break { levels, cond }
                } else {
                    StmtKind::Continue { levels, cond }
                };
                body.push(Stmt {
                    line: line_no,
                    kind,
                });
            }
            "ret" => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                cursor.advance();
                let (cond, value) = if cursor.at_eol() {
                    (None, None)
                } else {
                    let first = cursor.parse_expr(3)?;
                    if cursor.eat(&TokenKind::Comma) {
                        let value = cursor.parse_expr(3)?;
                        (Some(first), Some(value))
                    } else {
                        (None, Some(first))
                    }
                };
                cursor.expect_eol()?;
                body.push(Stmt {
                    line: line_no,
                    kind: StmtKind::Return { cond, value },
                });
            }
            "terminar" => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                cursor.advance();
                cursor.expect_eol()?;
                body.push(Stmt {
                    line: line_no,
                    kind: StmtKind::Terminate,
                });
            }
            _ if is_type_name(&kw) => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                let decls = parse_var_decl(&mut cursor, line_no)?;
                body.push(Stmt {
                    line: line_no,
                    kind: StmtKind::Local(decls),
                });
            }
            _ => {
                let idx = stream.advance_line().expect("peeked");
                let line = &stream.lines[idx];
                let mut cursor = TokenCursor::new(stream.file, line);
                let expr = cursor.parse_expr(0)?;
                cursor.expect_eol()?;
                body.push(Stmt {
                    line: line_no,
                    kind: StmtKind::Expr(expr),
                });
            }
        }
    }
    Ok((body, None))
}

/// Parses a loop body terminated by `efim`, consuming the terminator.
fn parse_block(
    stream: &mut LineStream<'_>,
    open_line: u32,
    construct: &str,
) -> Result<Vec<Stmt>, ParseError> {
    let (inner, stop) = parse_body(stream, &["efim"])?;
    if stop.as_deref() != Some("efim") {
        return Err(stream.error_at(open_line, format!("`{construct}` without matching `efim`")));
    }
    let idx = stream.advance_line().expect("stop keyword present");
                            let line = &stream.lines[idx];
    let mut cursor = TokenCursor::new(stream.file, line);
    cursor.advance();
    cursor.expect_eol()?;
    Ok(inner)
}

// =========================================================================
// Expression parsing (Pratt / precedence climbing)
// =========================================================================

struct TokenCursor<'src> {
    file: &'src str,
    line: u32,
    tokens: &'src [Token],
    pos: usize,
}

impl<'src> TokenCursor<'src> {
    fn new(file: &'src str, line: &'src Line) -> Self {
        Self {
            file,
            line: line.number,
            tokens: &line.tokens,
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let column = self.tokens.get(self.pos).map_or(1, |t| t.column);
        ParseError {
            file: self.file.to_string(),
            pos: SourcePos {
                line: self.line,
                column,
            },
            message: message.into(),
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        let t = self.peek();
        if t.kind == TokenKind::Eof {
            None
        } else {
            Some(&t.kind)
        }
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        let t = self.tokens.get(self.pos + offset)?;
        if t.kind == TokenKind::Eof {
            None
        } else {
            Some(t)
        }
    }

    fn advance(&mut self) -> &Token {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {kind:?}")))
        }
    }

    fn at_eol(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn expect_eol(&self) -> Result<(), ParseError> {
        if self.at_eol() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing tokens"))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    /// `epara` helper: nothing before the separator means "absent".
    fn parse_optional_until(&mut self, sep: &TokenKind) -> Result<Option<Expr>, ParseError> {
        if &self.peek().kind == sep {
            return Ok(None);
        }
        Ok(Some(self.parse_expr(0)?))
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_prefix()?;
        lhs = self.parse_postfix(lhs)?;

        loop {
            let (op_bp, right_bp) = match &self.peek().kind {
                TokenKind::Assign
                | TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::StarAssign
                | TokenKind::SlashAssign
                | TokenKind::PercentAssign
                | TokenKind::ShlAssign
                | TokenKind::ShrAssign
                | TokenKind::AmpAssign
                | TokenKind::PipeAssign
                | TokenKind::CaretAssign => (2, 2), // right associative
                TokenKind::Question => (4, 0),
                TokenKind::QuestionQuestion => (5, 6),
                TokenKind::PipePipe => (6, 7),
                TokenKind::AmpAmp => (7, 8),
                TokenKind::Pipe => (8, 9),
                TokenKind::Caret => (9, 10),
                TokenKind::Amp => (10, 11),
                TokenKind::EqEq | TokenKind::NotEq | TokenKind::EqEqEq | TokenKind::NotEqEq => {
                    (11, 12)
                }
                TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge => (12, 13),
                TokenKind::Shl | TokenKind::Shr => (13, 14),
                TokenKind::Plus | TokenKind::Minus => (14, 15),
                TokenKind::Star | TokenKind::Slash | TokenKind::Percent => (15, 16),
                _ => break,
            };
            if op_bp < min_bp {
                break;
            }
            let op_token = self.advance().kind.clone();
            lhs = match op_token {
                TokenKind::Question => {
                    let then = self.parse_expr(0)?;
                    self.expect(&TokenKind::Colon)?;
                    let otherwise = self.parse_expr(4)?;
                    Expr::Ternary {
                        cond: Box::new(lhs),
                        then: Box::new(then),
                        otherwise: Box::new(otherwise),
                    }
                }
                TokenKind::QuestionQuestion => Expr::Coalesce {
                    lhs: Box::new(lhs),
                    rhs: Box::new(self.parse_expr(right_bp)?),
                },
                TokenKind::PipePipe => Expr::Or {
                    lhs: Box::new(lhs),
                    rhs: Box::new(self.parse_expr(right_bp)?),
                },
                TokenKind::AmpAmp => Expr::And {
                    lhs: Box::new(lhs),
                    rhs: Box::new(self.parse_expr(right_bp)?),
                },
                TokenKind::Assign => Expr::Assign {
                    target: Box::new(lhs),
                    op: AssignOp::Set,
                    value: Box::new(self.parse_expr(right_bp)?),
                },
                TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::StarAssign
                | TokenKind::SlashAssign
                | TokenKind::PercentAssign
                | TokenKind::ShlAssign
                | TokenKind::ShrAssign
                | TokenKind::AmpAssign
                | TokenKind::PipeAssign
                | TokenKind::CaretAssign => {
                    let op = match op_token {
                        TokenKind::PlusAssign => AssignOp::Add,
                        TokenKind::MinusAssign => AssignOp::Sub,
                        TokenKind::StarAssign => AssignOp::Mul,
                        TokenKind::SlashAssign => AssignOp::Div,
                        TokenKind::PercentAssign => AssignOp::Rem,
                        TokenKind::ShlAssign => AssignOp::Shl,
                        TokenKind::ShrAssign => AssignOp::Shr,
                        TokenKind::AmpAssign => AssignOp::BitAnd,
                        TokenKind::PipeAssign => AssignOp::BitOr,
                        _ => AssignOp::BitXor,
                    };
                    Expr::Assign {
                        target: Box::new(lhs),
                        op,
                        value: Box::new(self.parse_expr(right_bp)?),
                    }
                }
                other => {
                    let op = match other {
                        TokenKind::Pipe => BinaryOp::BitOr,
                        TokenKind::Caret => BinaryOp::BitXor,
                        TokenKind::Amp => BinaryOp::BitAnd,
                        TokenKind::EqEq => BinaryOp::Eq,
                        TokenKind::NotEq => BinaryOp::Ne,
                        TokenKind::EqEqEq => BinaryOp::EqStrict,
                        TokenKind::NotEqEq => BinaryOp::NeStrict,
                        TokenKind::Lt => BinaryOp::Lt,
                        TokenKind::Le => BinaryOp::Le,
                        TokenKind::Gt => BinaryOp::Gt,
                        TokenKind::Ge => BinaryOp::Ge,
                        TokenKind::Shl => BinaryOp::Shl,
                        TokenKind::Shr => BinaryOp::Shr,
                        TokenKind::Plus => BinaryOp::Add,
                        TokenKind::Minus => BinaryOp::Sub,
                        TokenKind::Star => BinaryOp::Mul,
                        TokenKind::Slash => BinaryOp::Div,
                        TokenKind::Percent => BinaryOp::Rem,
                        _ => unreachable!("binding table and op table agree"),
                    };
                    Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(self.parse_expr(right_bp)?),
                    }
                }
            };
            // postfix may follow a parenthesised chain, e.g. `(a?b:c).x`
            lhs = self.parse_postfix(lhs)?;
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::Int(v))
            }
            TokenKind::Double(v) => {
                self.advance();
                Ok(Expr::Double(v))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Minus => {
                self.advance();
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(self.parse_unary_operand()?),
                })
            }
            TokenKind::Bang => {
                self.advance();
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(self.parse_unary_operand()?),
                })
            }
            TokenKind::Tilde => {
                self.advance();
                Ok(Expr::Unary {
                    op: UnaryOp::BitNot,
                    expr: Box::new(self.parse_unary_operand()?),
                })
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let dec = self.peek().kind == TokenKind::MinusMinus;
                self.advance();
                let target = self.parse_unary_operand()?;
                Ok(Expr::IncDec {
                    target: Box::new(target),
                    dec,
                    post: false,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr(0)?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_expr(3)?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBracket)?;
                }
                Ok(Expr::Array(items))
            }
            TokenKind::Dollar => {
                self.advance();
                let name = self.parse_name_pieces(true)?;
                Ok(Expr::IndexedRef(name))
            }
            TokenKind::Ident(word) => self.parse_ident_expr(&word),
            other => Err(self.error(format!("expected an expression, found {other:?}"))),
        }
    }

    fn parse_unary_operand(&mut self) -> Result<Expr, ParseError> {
        let inner = self.parse_prefix()?;
        self.parse_postfix(inner)
    }

    /// Identifiers, keywords-as-expressions, class member references, and
    /// dynamic names all start from a leading word.
    fn parse_ident_expr(&mut self, word: &str) -> Result<Expr, ParseError> {
        let lower = word.to_ascii_lowercase();
        if lower == "nulo" {
            self.advance();
            return Ok(Expr::Null);
        }
        if lower == "este" {
            self.advance();
            return Ok(Expr::This);
        }
        if lower == "args" {
            self.advance();
            return Ok(Expr::ArgCount);
        }
        if let Some(rest) = lower.strip_prefix("arg") {
            if rest.len() == 1 && rest.as_bytes()[0].is_ascii_digit() {
                self.advance();
                return Ok(Expr::Arg(rest.as_bytes()[0] - b'0'));
            }
        }

        self.advance();
        let name = self.continue_name_pieces(word.to_string())?;

        // `Classe:membro` — the colon must touch its neighbours, which is
        // what keeps this unambiguous against the spaced ternary colon.
        if self.peek().kind == TokenKind::Colon
            && self.peek().adjacent
            && self
                .peek_at(1)
                .is_some_and(|t| t.adjacent && matches!(t.kind, TokenKind::Ident(_)))
        {
            self.advance(); // colon
            let member_first = self.expect_ident("member name")?;
            let member = self.continue_name_pieces(member_first)?;
            return Ok(Expr::ClassMember {
                class: name,
                member,
            });
        }

        Ok(Expr::Ident(name))
    }

    /// Parses `$`-style names: pieces glued together by adjacency, each an
    /// identifier fragment or a `[expr]` splice.
    fn parse_name_pieces(&mut self, first_required: bool) -> Result<DynName, ParseError> {
        let mut pieces = Vec::new();
        loop {
            let t = self.peek();
            let glued = t.adjacent || (pieces.is_empty() && first_required);
            if !glued {
                break;
            }
            match &t.kind {
                TokenKind::Ident(text) => {
                    pieces.push(NamePiece::Text(text.clone()));
                    self.advance();
                }
                TokenKind::LBracket => {
                    self.advance();
                    let expr = self.parse_expr(0)?;
                    self.expect(&TokenKind::RBracket)?;
                    pieces.push(NamePiece::Expr(expr));
                }
                _ => break,
            }
        }
        if pieces.is_empty() {
            return Err(self.error("expected a name"));
        }
        Ok(DynName { pieces })
    }

    /// Continues a name that began with `first`: appends adjacent ident
    /// fragments and `[expr]` splices, but only when a splice is actually
    /// present (a lone `ident[0]` stays an index expression).
    fn continue_name_pieces(&mut self, first: String) -> Result<DynName, ParseError> {
        let mut pieces = vec![NamePiece::Text(first)];
        // a dynamic name needs the bracket glued AND a closing tail glued
        // to the bracket (`pre_[x]` / `pre_[x]_suf`); otherwise the
        // bracket is postfix indexing and is left for the caller.
        while self.peek().kind == TokenKind::LBracket
            && self.peek().adjacent
            && self.bracket_is_name_splice()
        {
            self.advance();
            let expr = self.parse_expr(0)?;
            self.expect(&TokenKind::RBracket)?;
            pieces.push(NamePiece::Expr(expr));
            while let TokenKind::Ident(text) = &self.peek().kind {
                if !self.peek().adjacent {
                    break;
                }
                pieces.push(NamePiece::Text(text.clone()));
                self.advance();
            }
        }
        Ok(DynName { pieces })
    }

    /// Looks past a matching `]` to decide whether a glued bracket is a
    /// name splice (`a_[i]_b`, `Classe[i]:m`, `$sala_[i]`) rather than an
    /// index (`vet[i]`). It is a splice when the name began with a
    /// trailing underscore fragment, or when the `]` is followed by a
    /// glued identifier or colon.
    fn bracket_is_name_splice(&self) -> bool {
        // find the matching close bracket
        let mut depth = 0usize;
        let mut i = self.pos;
        while let Some(t) = self.tokens.get(i) {
            match t.kind {
                TokenKind::LBracket => depth += 1,
                TokenKind::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        let after = match self.tokens.get(i + 1) {
            Some(t) => t,
            None => return false,
        };
        if after.adjacent && matches!(after.kind, TokenKind::Ident(_) | TokenKind::Colon) {
            return true;
        }
        // `pre_[x]` with nothing glued after: the underscore marks intent
        if self.pos > 0 {
            if let TokenKind::Ident(prev) = &self.tokens[self.pos - 1].kind {
                return prev.ends_with('_');
            }
        }
        false
    }

    fn parse_postfix(&mut self, mut lhs: Expr) -> Result<Expr, ParseError> {
        loop {
            match &self.peek().kind {
                TokenKind::Dot => {
                    // a glued `.digits` is array-size syntax in decls, never
                    // reachable here; member access always has a name
                    self.advance();
                    let countdown = self.eat(&TokenKind::At);
                    let first = self.expect_ident("member name")?;
                    let name = self.continue_name_pieces(first)?;
                    lhs = Expr::Member {
                        recv: Box::new(lhs),
                        name,
                        countdown,
                    };
                }
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.eat(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr(3)?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(&TokenKind::RParen)?;
                    }
                    lhs = Expr::Call {
                        callee: Box::new(lhs),
                        args,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr(0)?;
                    self.expect(&TokenKind::RBracket)?;
                    lhs = Expr::Index {
                        recv: Box::new(lhs),
                        index: Box::new(index),
                    };
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let dec = self.peek().kind == TokenKind::MinusMinus;
                    self.advance();
                    lhs = Expr::IncDec {
                        target: Box::new(lhs),
                        dec,
                        post: true,
                    };
                }
                _ => return Ok(lhs),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse_ok(text: &str) -> Vec<ClassDecl> {
        parse_source("test.int", text).expect("parse failure")
    }

    fn only_func(text: &str) -> Vec<Stmt> {
        let classes = parse_ok(text);
        classes[0].funcs[0].body.clone()
    }

    #[test]
    fn hello_world_shape() {
        let classes = parse_ok("classe main\nfunc inicializar\n  escrevaln(\"Olá, Mundo!\")\n  ret 1\n");
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name, "main");
        assert_eq!(classes[0].funcs.len(), 1);
        assert_eq!(classes[0].funcs[0].name, "inicializar");
        assert_eq!(classes[0].funcs[0].body.len(), 2);
        assert!(matches!(
            classes[0].funcs[0].body[1].kind,
            StmtKind::Return {
                cond: None,
                value: Some(Expr::Int(1))
            }
        ));
    }

    #[test]
    fn inheritance_header() {
        let classes = parse_ok("classe c\nherda a, b\n");
        assert_eq!(classes[0].bases, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn variable_declarations() {
        let classes = parse_ok("classe m\ncomum int32 contador = 1\nsav txt80 nome\nint32 vet.10\n");
        let vars = &classes[0].vars;
        assert_eq!(vars.len(), 3);
        assert!(vars[0].common && !vars[0].saved);
        assert_eq!(vars[0].init, Some(Expr::Int(1)));
        assert!(vars[1].saved);
        assert_eq!(vars[1].type_name, "txt80");
        assert_eq!(vars[2].array, 10);
    }

    #[test]
    fn if_chain() {
        let body = only_func(
            "classe m\nfunc f\n  se arg0\n    ret 1\n  senao arg1\n    ret 2\n  senao\n    ret 3\n  fimse\n",
        );
        let StmtKind::If { arms } = &body[0].kind else {
            panic!("expected if, got {:?}", body[0].kind);
        };
        assert_eq!(arms.len(), 3);
        assert!(arms[0].0.is_some());
        assert!(arms[1].0.is_some());
        assert!(arms[2].0.is_none());
    }

    #[test]
    fn loops_and_exits() {
        let body = only_func(
            "classe m\nfunc f\n  enquanto x < 10\n    x++\n    sair , x == 5\n  efim\n  epara i = 0; i < 3; i++\n    continuar 1, i == 1\n  efim\n",
        );
        assert!(matches!(body[0].kind, StmtKind::While { .. }));
        assert!(matches!(body[1].kind, StmtKind::For { .. }));
    }

    #[test]
    fn switch_with_default() {
        let body = only_func(
            "classe m\nfunc f\n  casovar arg0\n  caso 1, 2\n    ret 10\n  padrao\n    ret 0\n  efim\n",
        );
        let StmtKind::Switch { arms, default, .. } = &body[0].kind else {
            panic!("expected switch");
        };
        assert_eq!(arms.len(), 1);
        assert_eq!(arms[0].labels.len(), 2);
        assert!(default.is_some());
    }

    #[test]
    fn conditional_return() {
        let body = only_func("classe m\nfunc f\n  ret x > 2, x\n");
        assert!(matches!(
            &body[0].kind,
            StmtKind::Return {
                cond: Some(_),
                value: Some(_)
            }
        ));
    }

    #[test]
    fn class_member_vs_ternary() {
        let body = only_func("classe m\nfunc f\n  x = cond ? Porta:abrir : y\n");
        let StmtKind::Expr(Expr::Assign { value, .. }) = &body[0].kind else {
            panic!("expected assignment");
        };
        let Expr::Ternary { then, .. } = value.as_ref() else {
            panic!("expected ternary, got {value:?}");
        };
        assert!(matches!(then.as_ref(), Expr::ClassMember { .. }));
    }

    #[test]
    fn dynamic_names() {
        let body = only_func("classe m\nfunc f\n  y = $sala_[n]\n  z = este.item_[i]_nome\n");
        let StmtKind::Expr(Expr::Assign { value, .. }) = &body[0].kind else {
            panic!("expected assignment");
        };
        let Expr::IndexedRef(name) = value.as_ref() else {
            panic!("expected indexed ref, got {value:?}");
        };
        assert_eq!(name.pieces.len(), 2);
        let StmtKind::Expr(Expr::Assign { value, .. }) = &body[1].kind else {
            panic!("expected assignment");
        };
        let Expr::Member { name, .. } = value.as_ref() else {
            panic!("expected member access, got {value:?}");
        };
        assert_eq!(name.pieces.len(), 3);
    }

    #[test]
    fn plain_indexing_is_not_a_name_splice() {
        let body = only_func("classe m\nfunc f\n  y = vet[2]\n");
        let StmtKind::Expr(Expr::Assign { value, .. }) = &body[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.as_ref(), Expr::Index { .. }));
    }

    #[test]
    fn local_declarations_in_functions() {
        let body = only_func("classe m\nfunc f\n  int32 soma = 0\n  soma += 2\n");
        assert!(matches!(&body[0].kind, StmtKind::Local(d) if d.len() == 1));
    }

    #[test]
    fn countdown_member_marker() {
        let body = only_func("classe m\nfunc f\n  x = p.@classes\n");
        let StmtKind::Expr(Expr::Assign { value, .. }) = &body[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value.as_ref(),
            Expr::Member { countdown: true, .. }
        ));
    }

    #[test]
    fn comments_are_stripped() {
        let classes = parse_ok("classe m # the main class\nfunc f\n  x = \"a#b\" # trailing\n");
        assert_eq!(classes[0].funcs.len(), 1);
    }
}
