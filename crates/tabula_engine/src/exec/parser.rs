//! Parser for the document query language

use super::ast::*;
use crate::types::EngineError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Keywords
    Create,
    Drop,
    Table,
    If,
    Exists,
    Insert,
    Into,
    Values,
    Select,
    From,
    Where,
    Order,
    By,
    Asc,
    Desc,
    Limit,
    Offset,
    Update,
    Set,
    Delete,
    As,
    And,
    Or,
    Not,
    Is,
    Null,
    True,
    False,

    // Symbols
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Colon,
    Comma,
    Dot,
    Semicolon,
    Question,     // ? (positional parameter)
    Dollar,       // $ (named parameter)

    // Operators
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,

    // Literals
    Ident(String),
    String(String),
    Int(i64),
    Float(f64),

    Eof,
}

/// Deepest expression tree the parser builds. Nested brackets, prefix
/// operators and each link of a binary operator chain count one level.
pub const MAX_EXPR_DEPTH: usize = 128;

fn parse_err(msg: impl Into<String>) -> EngineError {
    EngineError::Parse(msg.into())
}

struct Lexer {
    input: Vec<char>,
    pos: usize,
    // a number right after `.` is a path index, never a float
    after_dot: bool,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            after_dot: false,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '-' && self.input.get(self.pos + 1) == Some(&'-') {
                // line comment
                while let Some(c) = self.advance() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn read_ident(&mut self) -> String {
        let mut s = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                s.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        s
    }

    /// Reads a quoted run; a doubled quote char stands for itself.
    fn read_quoted(&mut self, quote: char) -> Result<String, EngineError> {
        self.advance(); // consume opening quote
        let mut s = String::new();
        while let Some(ch) = self.advance() {
            if ch == quote {
                if self.peek() == Some(quote) {
                    self.advance();
                    s.push(quote);
                    continue;
                }
                return Ok(s);
            }
            s.push(ch);
        }
        Err(parse_err(format!("unterminated {quote}-quoted literal")))
    }

    fn read_number(&mut self) -> Result<Token, EngineError> {
        let mut num = String::new();
        let mut is_float = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                num.push(ch);
                self.advance();
            } else if ch == '.' && !is_float && !self.after_dot {
                // only a decimal point when a digit follows
                match self.input.get(self.pos + 1) {
                    Some(nc) if nc.is_ascii_digit() => {
                        is_float = true;
                        num.push('.');
                        self.advance();
                    }
                    _ => break,
                }
            } else {
                break;
            }
        }
        if is_float {
            num.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| parse_err(format!("invalid float: {num}")))
        } else {
            num.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| parse_err(format!("invalid int: {num}")))
        }
    }

    fn next_token(&mut self) -> Result<Token, EngineError> {
        let tok = self.scan_token()?;
        self.after_dot = tok == Token::Dot;
        Ok(tok)
    }

    fn scan_token(&mut self) -> Result<Token, EngineError> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(Token::Eof),
            Some('(') => { self.advance(); Ok(Token::LeftParen) }
            Some(')') => { self.advance(); Ok(Token::RightParen) }
            Some('{') => { self.advance(); Ok(Token::LeftBrace) }
            Some('}') => { self.advance(); Ok(Token::RightBrace) }
            Some('[') => { self.advance(); Ok(Token::LeftBracket) }
            Some(']') => { self.advance(); Ok(Token::RightBracket) }
            Some(':') => { self.advance(); Ok(Token::Colon) }
            Some(',') => { self.advance(); Ok(Token::Comma) }
            Some('.') => { self.advance(); Ok(Token::Dot) }
            Some(';') => { self.advance(); Ok(Token::Semicolon) }
            Some('?') => { self.advance(); Ok(Token::Question) }
            Some('$') => { self.advance(); Ok(Token::Dollar) }
            Some('*') => { self.advance(); Ok(Token::Star) }
            Some('+') => { self.advance(); Ok(Token::Plus) }
            Some('-') => { self.advance(); Ok(Token::Minus) }
            Some('/') => { self.advance(); Ok(Token::Slash) }
            Some('=') => { self.advance(); Ok(Token::Eq) }
            Some('\'') => self.read_quoted('\'').map(Token::String),
            Some('"') => self.read_quoted('"').map(Token::String),
            Some('`') => self.read_quoted('`').map(Token::Ident),
            Some('<') => {
                self.advance();
                match self.peek() {
                    Some('=') => { self.advance(); Ok(Token::Le) }
                    Some('>') => { self.advance(); Ok(Token::Ne) }
                    _ => Ok(Token::Lt),
                }
            }
            Some('>') => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    Ok(Token::Ge)
                } else {
                    Ok(Token::Gt)
                }
            }
            Some('!') => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    Ok(Token::Ne)
                } else {
                    Err(parse_err("unexpected !"))
                }
            }
            Some(ch) if ch.is_ascii_digit() => self.read_number(),
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let ident = self.read_ident();
                let upper = ident.to_uppercase();
                Ok(match upper.as_str() {
                    "CREATE" => Token::Create,
                    "DROP" => Token::Drop,
                    "TABLE" => Token::Table,
                    "IF" => Token::If,
                    "EXISTS" => Token::Exists,
                    "INSERT" => Token::Insert,
                    "INTO" => Token::Into,
                    "VALUES" => Token::Values,
                    "SELECT" => Token::Select,
                    "FROM" => Token::From,
                    "WHERE" => Token::Where,
                    "ORDER" => Token::Order,
                    "BY" => Token::By,
                    "ASC" => Token::Asc,
                    "DESC" => Token::Desc,
                    "LIMIT" => Token::Limit,
                    "OFFSET" => Token::Offset,
                    "UPDATE" => Token::Update,
                    "SET" => Token::Set,
                    "DELETE" => Token::Delete,
                    "AS" => Token::As,
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IS" => Token::Is,
                    "NULL" => Token::Null,
                    "TRUE" => Token::True,
                    "FALSE" => Token::False,
                    _ => Token::Ident(ident),
                })
            }
            Some(ch) => Err(parse_err(format!("unexpected char: {ch}"))),
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    positional: usize,
    depth: usize,
}

impl Parser {
    pub fn new(input: &str) -> Result<Self, EngineError> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            if tok == Token::Eof {
                tokens.push(tok);
                break;
            }
            tokens.push(tok);
        }
        Ok(Self { tokens, pos: 0, positional: 0, depth: 0 })
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok != Token::Eof {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<(), EngineError> {
        let tok = self.advance();
        if tok == expected {
            Ok(())
        } else {
            Err(parse_err(format!("expected {:?}, got {:?}", expected, tok)))
        }
    }

    /// Consume `tok` if it is next.
    fn accept(&mut self, tok: Token) -> bool {
        if *self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Claims one level of expression depth; callers give it back on success.
    fn descend(&mut self) -> Result<(), EngineError> {
        if self.depth >= MAX_EXPR_DEPTH {
            return Err(parse_err(format!("expression nested deeper than {MAX_EXPR_DEPTH} levels")));
        }
        self.depth += 1;
        Ok(())
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, EngineError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            tok => Err(parse_err(format!("expected {what}, got {:?}", tok))),
        }
    }

    /// Parses exactly one statement, optionally followed by `;`.
    pub fn parse_statement(&mut self) -> Result<Statement, EngineError> {
        let stmt = match self.peek() {
            Token::Create => self.parse_create_table()?,
            Token::Drop => self.parse_drop_table()?,
            Token::Insert => Statement::Insert(self.parse_insert()?),
            Token::Select => Statement::Select(self.parse_select()?),
            Token::Update => Statement::Update(self.parse_update()?),
            Token::Delete => Statement::Delete(self.parse_delete()?),
            tok => return Err(parse_err(format!("expected a statement, got {:?}", tok))),
        };
        self.accept(Token::Semicolon);
        if *self.peek() != Token::Eof {
            return Err(parse_err(format!("unexpected trailing token {:?}", self.peek())));
        }
        Ok(stmt)
    }

    fn parse_create_table(&mut self) -> Result<Statement, EngineError> {
        self.expect(Token::Create)?;
        self.expect(Token::Table)?;
        let if_not_exists = if self.accept(Token::If) {
            self.expect(Token::Not)?;
            self.expect(Token::Exists)?;
            true
        } else {
            false
        };
        let name = self.expect_ident("table name")?;
        Ok(Statement::CreateTable { name, if_not_exists })
    }

    fn parse_drop_table(&mut self) -> Result<Statement, EngineError> {
        self.expect(Token::Drop)?;
        self.expect(Token::Table)?;
        let if_exists = if self.accept(Token::If) {
            self.expect(Token::Exists)?;
            true
        } else {
            false
        };
        let name = self.expect_ident("table name")?;
        Ok(Statement::DropTable { name, if_exists })
    }

    fn parse_insert(&mut self) -> Result<InsertStatement, EngineError> {
        self.expect(Token::Insert)?;
        self.expect(Token::Into)?;
        let table = self.expect_ident("table name")?;

        let fields = if self.accept(Token::LeftParen) {
            let mut fields = Vec::new();
            loop {
                fields.push(self.expect_ident("field name")?);
                if !self.accept(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RightParen)?;
            Some(fields)
        } else {
            None
        };

        self.expect(Token::Values)?;
        let source = match fields {
            Some(fields) => {
                let mut rows = Vec::new();
                loop {
                    self.expect(Token::LeftParen)?;
                    let mut row = Vec::new();
                    loop {
                        row.push(self.parse_expr()?);
                        if !self.accept(Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RightParen)?;
                    if row.len() != fields.len() {
                        return Err(parse_err(format!(
                            "{} values for {} fields",
                            row.len(),
                            fields.len()
                        )));
                    }
                    rows.push(row);
                    if !self.accept(Token::Comma) {
                        break;
                    }
                }
                InsertSource::Tuples { fields, rows }
            }
            None => {
                let mut docs = Vec::new();
                loop {
                    docs.push(self.parse_expr()?);
                    if !self.accept(Token::Comma) {
                        break;
                    }
                }
                InsertSource::Documents(docs)
            }
        };
        Ok(InsertStatement { table, source })
    }

    fn parse_select(&mut self) -> Result<SelectStatement, EngineError> {
        self.expect(Token::Select)?;
        let projection = if self.accept(Token::Star) {
            Projection::Wildcard
        } else {
            let mut items = Vec::new();
            loop {
                let expr = self.parse_expr()?;
                let alias = if self.accept(Token::As) {
                    Some(self.expect_ident("alias after AS")?)
                } else {
                    None
                };
                items.push(SelectItem { expr, alias });
                if !self.accept(Token::Comma) {
                    break;
                }
            }
            Projection::Items(items)
        };
        self.expect(Token::From)?;
        let table = self.expect_ident("table name")?;
        let where_clause = self.parse_where()?;

        let order_by = if self.accept(Token::Order) {
            self.expect(Token::By)?;
            let path = self.parse_field_path()?;
            let descending = match self.peek() {
                Token::Desc => { self.advance(); true }
                Token::Asc => { self.advance(); false }
                _ => false, // Default to ASC
            };
            Some(OrderByItem { path, descending })
        } else {
            None
        };

        let limit = if self.accept(Token::Limit) { Some(self.parse_count("LIMIT")?) } else { None };
        let offset = if self.accept(Token::Offset) { Some(self.parse_count("OFFSET")?) } else { None };

        Ok(SelectStatement { projection, table, where_clause, order_by, limit, offset })
    }

    fn parse_count(&mut self, clause: &str) -> Result<u64, EngineError> {
        match self.advance() {
            Token::Int(n) if n >= 0 => Ok(n as u64),
            tok => Err(parse_err(format!("expected non-negative int after {clause}, got {:?}", tok))),
        }
    }

    fn parse_update(&mut self) -> Result<UpdateStatement, EngineError> {
        self.expect(Token::Update)?;
        let table = self.expect_ident("table name")?;
        self.expect(Token::Set)?;
        let mut assignments = Vec::new();
        loop {
            let path = self.parse_field_path()?;
            self.expect(Token::Eq)?;
            let expr = self.parse_expr()?;
            assignments.push((path, expr));
            if !self.accept(Token::Comma) {
                break;
            }
        }
        let where_clause = self.parse_where()?;
        Ok(UpdateStatement { table, assignments, where_clause })
    }

    fn parse_delete(&mut self) -> Result<DeleteStatement, EngineError> {
        self.expect(Token::Delete)?;
        self.expect(Token::From)?;
        let table = self.expect_ident("table name")?;
        let where_clause = self.parse_where()?;
        Ok(DeleteStatement { table, where_clause })
    }

    fn parse_where(&mut self) -> Result<Option<Expr>, EngineError> {
        if self.accept(Token::Where) {
            Ok(Some(self.parse_expr()?))
        } else {
            Ok(None)
        }
    }

    fn parse_field_path(&mut self) -> Result<FieldPath, EngineError> {
        let mut path = vec![self.expect_ident("field name")?];
        while self.accept(Token::Dot) {
            match self.advance() {
                Token::Ident(seg) => path.push(seg),
                Token::Int(idx) if idx >= 0 => path.push(idx.to_string()),
                tok => return Err(parse_err(format!("expected path segment, got {:?}", tok))),
            }
        }
        Ok(path)
    }

    fn parse_expr(&mut self) -> Result<Expr, EngineError> {
        self.descend()?;
        let expr = self.parse_or_expr()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_or_expr(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_and_expr()?;
        let mut links = 0;
        while *self.peek() == Token::Or {
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_and_expr()?;
            left = Expr::BinaryOp(Box::new(left), BinOp::Or, Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_not_expr()?;
        let mut links = 0;
        while *self.peek() == Token::And {
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_not_expr()?;
            left = Expr::BinaryOp(Box::new(left), BinOp::And, Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_not_expr(&mut self) -> Result<Expr, EngineError> {
        if self.accept(Token::Not) {
            self.descend()?;
            let operand = self.parse_not_expr()?;
            self.depth -= 1;
            return Ok(Expr::UnaryOp(UnOp::Not, Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EngineError> {
        let left = self.parse_additive()?;

        if self.accept(Token::Is) {
            let is_not = self.accept(Token::Not);
            self.expect(Token::Null)?;
            return Ok(if is_not {
                Expr::IsNotNull(Box::new(left))
            } else {
                Expr::IsNull(Box::new(left))
            });
        }

        let op = match self.peek() {
            Token::Eq => BinOp::Eq,
            Token::Ne => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::BinaryOp(Box::new(left), op, Box::new(right)))
    }

    fn parse_additive(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_multiplicative()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::BinaryOp(Box::new(left), op, Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_unary()?;
            left = Expr::BinaryOp(Box::new(left), op, Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EngineError> {
        if self.accept(Token::Minus) {
            self.descend()?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(match operand {
                Expr::Literal(Literal::Int(i)) => Expr::Literal(Literal::Int(-i)),
                Expr::Literal(Literal::Float(f)) => Expr::Literal(Literal::Float(-f)),
                e => Expr::UnaryOp(UnOp::Neg, Box::new(e)),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, EngineError> {
        if let Token::Ident(_) = self.peek() {
            return Ok(Expr::Field(self.parse_field_path()?));
        }
        match self.advance() {
            Token::Question => {
                let idx = self.positional;
                self.positional += 1;
                Ok(Expr::Positional(idx))
            }
            Token::Dollar => {
                if let Token::Ident(param_name) = self.advance() {
                    Ok(Expr::Named(param_name))
                } else {
                    Err(parse_err("expected parameter name after $"))
                }
            }
            Token::String(s) => Ok(Expr::Literal(Literal::String(s))),
            Token::Int(i) => Ok(Expr::Literal(Literal::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
            Token::True => Ok(Expr::Literal(Literal::Bool(true))),
            Token::False => Ok(Expr::Literal(Literal::Bool(false))),
            Token::Null => Ok(Expr::Literal(Literal::Null)),
            Token::LeftBrace => self.parse_document_literal(),
            Token::LeftBracket => {
                let mut items = Vec::new();
                if !self.accept(Token::RightBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.accept(Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RightBracket)?;
                }
                Ok(Expr::Array(items))
            }
            Token::LeftParen => {
                let expr = self.parse_expr()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            tok => Err(parse_err(format!("unexpected token in expr: {:?}", tok))),
        }
    }

    /// `{key: expr, 'quoted key': expr}`; the opening brace is already consumed.
    fn parse_document_literal(&mut self) -> Result<Expr, EngineError> {
        let mut fields = Vec::new();
        if self.accept(Token::RightBrace) {
            return Ok(Expr::Document(fields));
        }
        loop {
            let key = match self.advance() {
                Token::Ident(k) | Token::String(k) => k,
                tok => return Err(parse_err(format!("expected document key, got {:?}", tok))),
            };
            if fields.iter().any(|(k, _)| *k == key) {
                return Err(parse_err(format!("duplicate document key: {key}")));
            }
            self.expect(Token::Colon)?;
            let val = self.parse_expr()?;
            fields.push((key, val));
            if !self.accept(Token::Comma) {
                break;
            }
        }
        self.expect(Token::RightBrace)?;
        Ok(Expr::Document(fields))
    }
}

pub fn parse(input: &str) -> Result<Statement, EngineError> {
    let mut parser = Parser::new(input)?;
    parser.parse_statement()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_select_with_all_clauses() {
        let stmt = parse("SELECT name, address.city AS city FROM users WHERE age >= ? AND active = true ORDER BY name DESC LIMIT 10 OFFSET 5;").unwrap();
        let Statement::Select(sel) = stmt else { panic!("expected select") };
        assert_eq!(sel.table, "users");
        let Projection::Items(items) = &sel.projection else { panic!("expected items") };
        assert_eq!(items[0].column_name(), "name");
        assert_eq!(items[1].column_name(), "city");
        assert_eq!(sel.order_by, Some(OrderByItem { path: vec!["name".into()], descending: true }));
        assert_eq!(sel.limit, Some(10));
        assert_eq!(sel.offset, Some(5));
        assert!(matches!(sel.where_clause, Some(Expr::BinaryOp(_, BinOp::And, _))));
    }

    #[test]
    fn numbers_positional_placeholders_in_order() {
        let stmt = parse("INSERT INTO t (a, b) VALUES (?, 1), (?, ?)").unwrap();
        let Statement::Insert(ins) = &stmt else { panic!("expected insert") };
        let InsertSource::Tuples { rows, .. } = &ins.source else { panic!("expected tuples") };
        assert_eq!(rows[0][0], Expr::Positional(0));
        assert_eq!(rows[1][0], Expr::Positional(1));
        assert_eq!(rows[1][1], Expr::Positional(2));
        assert_eq!(stmt.extract_parameters().0, 3);
    }

    #[test]
    fn parses_document_inserts_and_named_params() {
        let stmt = parse("insert into t values {name: $name, 'tags': [1, -2.5]}, ?").unwrap();
        let (positional, named) = stmt.extract_parameters();
        assert_eq!(positional, 1);
        assert!(named.contains("name"));
        let Statement::Insert(ins) = stmt else { panic!("expected insert") };
        let InsertSource::Documents(docs) = ins.source else { panic!("expected documents") };
        assert_eq!(docs.len(), 2);
        assert_eq!(
            docs[0],
            Expr::Document(vec![
                ("name".into(), Expr::Named("name".into())),
                ("tags".into(), Expr::Array(vec![
                    Expr::Literal(Literal::Int(1)),
                    Expr::Literal(Literal::Float(-2.5)),
                ])),
            ])
        );
    }

    #[test]
    fn parses_ddl() {
        assert_eq!(
            parse("CREATE TABLE IF NOT EXISTS users").unwrap(),
            Statement::CreateTable { name: "users".into(), if_not_exists: true }
        );
        assert_eq!(
            parse("DROP TABLE `odd name`").unwrap(),
            Statement::DropTable { name: "odd name".into(), if_exists: false }
        );
    }

    #[test]
    fn rejects_malformed_queries() {
        for q in [
            "",
            "SELEC * FROM t",
            "SELECT * FROM",
            "SELECT * FROM t WHERE",
            "SELECT * FROM t LIMIT -1",
            "INSERT INTO t (a, b) VALUES (1)",
            "INSERT INTO t VALUES {a: 1, a: 2}",
            "UPDATE t SET a = 'unterminated",
            "DELETE FROM t extra",
            "SELECT * FROM t; SELECT * FROM t",
        ] {
            assert!(matches!(parse(q), Err(EngineError::Parse(_))), "should reject {q:?}");
        }
    }

    #[test]
    fn precedence_not_and_or() {
        let stmt = parse("DELETE FROM t WHERE NOT a = 1 OR b < 2 * 3").unwrap();
        let Statement::Delete(del) = stmt else { panic!("expected delete") };
        assert_eq!(del.where_clause.unwrap().to_string(), "NOT a = 1 OR b < 2 * 3");
    }

    #[test]
    fn numeric_path_segments_stay_integers() {
        let stmt = parse("SELECT m.0.1 AS x FROM t WHERE m.10.2 = 1.5").unwrap();
        let Statement::Select(sel) = stmt else { panic!("expected select") };
        let Projection::Items(items) = &sel.projection else { panic!("expected items") };
        assert_eq!(items[0].expr, Expr::Field(vec!["m".into(), "0".into(), "1".into()]));
        assert_eq!(
            sel.where_clause,
            Some(Expr::BinaryOp(
                Box::new(Expr::Field(vec!["m".into(), "10".into(), "2".into()])),
                BinOp::Eq,
                Box::new(Expr::Literal(Literal::Float(1.5))),
            ))
        );
    }

    #[test]
    fn rejects_runaway_nesting() {
        let n = 2000;
        let queries = [
            format!("SELECT * FROM t WHERE {}1{}", "(".repeat(n), ")".repeat(n)),
            format!("SELECT * FROM t WHERE {}1", "NOT ".repeat(n)),
            format!("SELECT * FROM t WHERE a = {}1", "- ".repeat(n)),
            format!("SELECT * FROM t WHERE a = {}1{}", "[".repeat(n), "]".repeat(n)),
            format!("SELECT * FROM t WHERE a = {}", vec!["1"; n].join(" + ")),
            format!("SELECT * FROM t WHERE {}", vec!["a = 1"; n].join(" OR ")),
        ];
        for q in &queries {
            assert!(matches!(parse(q), Err(EngineError::Parse(_))), "should reject {}", &q[..40]);
        }
    }

    #[test]
    fn moderate_nesting_still_parses() {
        let n = 50;
        let q = format!("SELECT * FROM t WHERE {}a = 1{}", "(".repeat(n), ")".repeat(n));
        assert!(parse(&q).is_ok());
        let q = format!("SELECT * FROM t WHERE {}", vec!["a = 1"; 100].join(" OR "));
        assert!(parse(&q).is_ok());
        let q = format!("SELECT * FROM t WHERE a = {}", vec!["1"; 100].join(" + "));
        assert!(parse(&q).is_ok());
    }
}
