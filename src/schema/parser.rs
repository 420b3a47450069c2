use super::{ClassDecl, FieldDecl, FieldType, SchemaBuilder};
use crate::error::{Error, Result};

// Class lines hold a bare name; field lines hold `name: Type`. A class nested
// under another class body extends it.
pub(super) fn parse(text: &str) -> Result<SchemaBuilder> {
    let mut classes: Vec<ClassDecl> = vec![];
    // (indent, index into `classes`)
    let mut stack: Vec<(usize, usize)> = vec![];

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with('\t') {
            return Err(parse_error(line_no, "tabs are not allowed for indentation"));
        }

        let indent = line.len() - line.trim_start().len();
        let content = line.trim();

        while stack.last().is_some_and(|(level, _)| *level >= indent) {
            stack.pop();
        }

        if content.contains(':') {
            let Some(&(_, owner)) = stack.last() else {
                return Err(parse_error(line_no, "field declared outside of a class"));
            };
            let field = parse_field(content, line_no)?;
            classes[owner] = classes[owner].clone().decl(field);
        } else {
            if !is_ident(content) {
                return Err(parse_error(line_no, format!("invalid class name `{content}`")));
            }
            let mut decl = ClassDecl::new(content);
            if let Some(&(_, parent)) = stack.last() {
                decl = decl.extends(classes[parent].name.clone());
            }
            classes.push(decl);
            stack.push((indent, classes.len() - 1));
        }
    }

    Ok(classes
        .into_iter()
        .fold(SchemaBuilder::default(), SchemaBuilder::class))
}

fn parse_field(content: &str, line: usize) -> Result<FieldDecl> {
    let (head, ty) = content
        .split_once(':')
        .ok_or_else(|| parse_error(line, "expected `name: Type`"))?;

    let mut weak = false;
    let mut transient = false;
    let mut name = None;
    for word in head.split_whitespace() {
        match word {
            "@WeakRef" => weak = true,
            "@Transient" => transient = true,
            "@Const" => {}
            w if w.starts_with('@') => {
                return Err(parse_error(line, format!("unknown annotation `{w}`")))
            }
            w if name.is_none() && is_ident(w) => name = Some(w),
            w => return Err(parse_error(line, format!("unexpected `{w}`"))),
        }
    }

    let name = name.ok_or_else(|| parse_error(line, "missing field name"))?;
    let ty = TypeParser::new(ty, line).parse()?;

    let mut decl = FieldDecl::new(name, ty);
    if weak {
        decl = decl.weak();
    }
    if transient {
        decl = decl.transient();
    }
    Ok(decl)
}

#[derive(Clone, Debug, PartialEq)]
enum Token<'a> {
    Ident(&'a str),
    Open,
    Close,
    Comma,
    Question,
    Pipe,
}

struct TypeParser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    line: usize,
    error: Option<Error>,
}

impl<'a> TypeParser<'a> {
    fn new(src: &'a str, line: usize) -> Self {
        let mut tokens = vec![];
        let mut error = None;
        let mut rest = src.trim_start();

        while let Some(c) = rest.chars().next() {
            let (token, len) = match c {
                '[' => (Token::Open, 1),
                ']' => (Token::Close, 1),
                ',' => (Token::Comma, 1),
                '?' => (Token::Question, 1),
                '|' => (Token::Pipe, 1),
                c if c.is_alphanumeric() || c == '_' => {
                    let len = rest
                        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                        .unwrap_or(rest.len());
                    (Token::Ident(&rest[..len]), len)
                }
                c => {
                    error = Some(parse_error(line, format!("unexpected character `{c}` in type")));
                    break;
                }
            };
            tokens.push(token);
            rest = rest[len..].trim_start();
        }

        Self {
            tokens,
            pos: 0,
            line,
            error,
        }
    }

    fn parse(mut self) -> Result<FieldType> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let ty = self.union()?;
        if self.pos != self.tokens.len() {
            return Err(parse_error(self.line, "trailing tokens after type"));
        }
        Ok(ty)
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token<'a>) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(parse_error(
                self.line,
                format!("expected {expected:?}, found {other:?}"),
            )),
        }
    }

    fn union(&mut self) -> Result<FieldType> {
        let mut alts = vec![self.postfix()?];
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            alts.push(self.postfix()?);
        }

        Ok(if alts.len() == 1 {
            alts.remove(0)
        } else {
            FieldType::Union(alts)
        })
    }

    fn postfix(&mut self) -> Result<FieldType> {
        let mut ty = self.primary()?;
        while self.peek() == Some(&Token::Question) {
            self.pos += 1;
            ty = ty.optional();
        }
        Ok(ty)
    }

    fn primary(&mut self) -> Result<FieldType> {
        match self.next() {
            Some(Token::Open) => {
                let elem = self.union()?;
                self.expect(Token::Close)?;
                Ok(FieldType::list(elem))
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::Open) {
                    self.pos += 1;
                    self.generic(name)
                } else {
                    Ok(scalar_or_class(name))
                }
            }
            other => Err(parse_error(self.line, format!("expected a type, found {other:?}"))),
        }
    }

    fn generic(&mut self, name: &str) -> Result<FieldType> {
        let first = self.union()?;
        let ty = match name {
            "List" | "Set" => FieldType::list(first),
            "Optional" => first.optional(),
            "Map" => {
                if first != FieldType::String {
                    return Err(parse_error(self.line, "map keys must be String"));
                }
                self.expect(Token::Comma)?;
                FieldType::map(self.union()?)
            }
            other => return Err(parse_error(self.line, format!("unknown generic type `{other}`"))),
        };
        self.expect(Token::Close)?;
        Ok(ty)
    }
}

fn scalar_or_class(name: &str) -> FieldType {
    match name {
        "String" => FieldType::String,
        "Int" => FieldType::Int,
        "Float" | "Number" => FieldType::Float,
        "Bool" | "Boolean" => FieldType::Bool,
        "Any" => FieldType::Any,
        class => FieldType::inst(class),
    }
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::SchemaParse {
        line,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{FieldKind, Schema};
    use super::*;

    const SCHEMA: &str = "
# a tiny document model
Node
  @WeakRef parent: Node?
  TextNode
    text: String
  TagNode
    name: String
    children: [Node]
    attrs: Map[String, Expr]
    @WeakRef refs: Map[String, List[Expr]]
    @Transient hover: Bool
Expr
  value: String | Node
";

    #[test]
    fn parses_nested_classes() {
        let schema = Schema::parse(SCHEMA).unwrap();
        let node = schema.class_id("Node").unwrap();
        let text = schema.class_id("TextNode").unwrap();
        let tag = schema.class_id("TagNode").unwrap();
        let expr = schema.class_id("Expr").unwrap();

        assert_eq!(schema.class(text).parent(), Some(node));
        assert_eq!(schema.class(tag).parent(), Some(node));
        assert_eq!(schema.class(expr).parent(), None);
        assert_eq!(schema.fields_of(text).len(), 2);
        assert_eq!(schema.fields_of(tag).len(), 6);
    }

    #[test]
    fn parses_field_types() {
        let schema = Schema::parse(SCHEMA).unwrap();
        let tag = schema.class_id("TagNode").unwrap();
        let fields = schema.fields_of(tag);

        assert_eq!(fields[0].ty(), &FieldType::inst("Node").optional());
        assert_eq!(fields[2].ty(), &FieldType::list(FieldType::inst("Node")));
        assert_eq!(fields[3].ty(), &FieldType::map(FieldType::inst("Expr")));
        assert_eq!(fields[4].kind(), FieldKind::Map);
        assert!(fields[4].is_weak());
        assert!(fields[5].is_transient());

        let expr = schema.class_id("Expr").unwrap();
        assert_eq!(
            schema.fields_of(expr)[0].ty(),
            &FieldType::Union(vec![FieldType::String, FieldType::inst("Node")])
        );
        assert_eq!(schema.fields_of(expr)[0].kind(), FieldKind::StrongRef);
    }

    #[test]
    fn reports_line_numbers() {
        let err = Schema::parse("Node\n  name: Map[Int, String]\n").unwrap_err();
        assert!(matches!(err, Error::SchemaParse { line: 2, .. }));

        let err = Schema::parse("  x: String\n").unwrap_err();
        assert!(matches!(err, Error::SchemaParse { line: 1, .. }));

        let err = Schema::parse("Node\n  @Weak parent: Node\n").unwrap_err();
        assert!(matches!(err, Error::SchemaParse { line: 2, .. }));

        let err = Schema::parse("Node\n  parent: [Node\n").unwrap_err();
        assert!(matches!(err, Error::SchemaParse { line: 2, .. }));
    }

    #[test]
    fn optional_suffix_and_generic_agree() {
        let a = TypeParser::new("Optional[Node]", 1).parse().unwrap();
        let b = TypeParser::new("Node?", 1).parse().unwrap();
        assert_eq!(a, b);
    }
}
