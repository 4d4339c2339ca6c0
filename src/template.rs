//! A small template language for the `environment` option. These tags are understood:
//!
//! - `{{ path }}` substitutes the value found at `path`, where a path is a variable name followed by any number
//!   of `.field` or `['field']` / `[0]` accessors, for example `{{ pg.db_uri }}` or `{{ mongodb['endpoints'] }}`
//! - `{% if path %}`, `{% elif not path %}`, `{% else %}` and `{% endif %}` choose a branch by the truthiness
//!   of a path
//! - `{% for name in path %}` ... `{% endfor %}` repeats its body for every element of a list (or key of an
//!   object), with `name` and `loop` (`index`, `index0`, `first`, `last`, `length`) bound inside the body
//! - `{# ... #}` is a comment and renders as nothing
//!
//! Everything outside of tags is copied through unchanged.
//!
//! Dependencies are checked before rendering. A path used outside of any `if` block must resolve to a truthy
//! value. A path inside an `if` block, including its condition, only needs its top-level variable to be
//! truthy, so that `if` can guard optional fields. Names bound by `for` are never reported.
use crate::context::{is_truthy, lookup_in, Context};
use crate::error::TemplateError;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

use std::collections::BTreeSet;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"(?s)\{\{(.*?)\}\}|\{%(.*?)%\}|\{#(.*?)#\}").unwrap();
    static ref HEAD: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*").unwrap();
    static ref ACCESSOR: Regex =
        Regex::new(r#"^(?:\.([A-Za-z0-9_-]+)|\[\s*(?:'([^']*)'|"([^"]*)"|(\d+))\s*\])"#).unwrap();
    static ref FOR_HEAD: Regex = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s+in\s+(.+)$").unwrap();
}

const OPENERS: &[&str] = &["{{", "{%", "{#"];

/// Bound inside every `for` body
const LOOP: &str = "loop";

#[derive(Debug, Clone, PartialEq)]
struct VarPath {
    segments: Vec<String>,
}

impl VarPath {
    fn parse(expression: &str) -> Result<VarPath, TemplateError> {
        let invalid = || TemplateError::InvalidExpression {
            expression: expression.to_owned(),
        };
        let head = HEAD.find(expression).ok_or_else(invalid)?;
        let mut segments = vec![head.as_str().to_owned()];
        let mut rest = &expression[head.end()..];
        while !rest.is_empty() {
            let caps = ACCESSOR.captures(rest).ok_or_else(invalid)?;
            let segment = (1..=4)
                .filter_map(|i| caps.get(i))
                .next()
                .map(|m| m.as_str().to_owned())
                .ok_or_else(invalid)?;
            segments.push(segment);
            rest = &rest[caps.get(0).map(|m| m.end()).unwrap_or(rest.len())..];
        }
        Ok(VarPath { segments })
    }

    fn root(&self) -> &str {
        self.segments[0].as_str()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Condition {
    negated: bool,
    path: VarPath,
}

impl Condition {
    fn parse(expression: &str) -> Result<Condition, TemplateError> {
        let expression = expression.trim();
        match expression.strip_prefix("not ") {
            Some(rest) => Ok(Condition {
                negated: true,
                path: VarPath::parse(rest.trim())?,
            }),
            None => Ok(Condition {
                negated: false,
                path: VarPath::parse(expression)?,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(VarPath),
    If {
        branches: Vec<(Condition, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        binding: String,
        iterable: VarPath,
        body: Vec<Node>,
    },
}

enum Token {
    Text(String),
    Var(VarPath),
    Block(String),
}

fn tokenize(source: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for caps in TAG.captures_iter(source) {
        let tag = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        push_text(&mut tokens, source, last, tag.start())?;
        last = tag.end();

        if let Some(expression) = caps.get(1) {
            tokens.push(Token::Var(VarPath::parse(expression.as_str().trim())?));
        } else if let Some(block) = caps.get(2) {
            tokens.push(Token::Block(block.as_str().trim().to_owned()));
        }
    }
    push_text(&mut tokens, source, last, source.len())?;
    Ok(tokens)
}

fn push_text(tokens: &mut Vec<Token>, source: &str, start: usize, end: usize) -> Result<(), TemplateError> {
    let text = &source[start..end];
    if let Some(offset) = OPENERS.iter().filter_map(|o| text.find(o)).min() {
        return Err(TemplateError::Unterminated {
            offset: start + offset,
        });
    }
    if !text.is_empty() {
        tokens.push(Token::Text(text.to_owned()));
    }
    Ok(())
}

/// Splits `for x in y` into `("for", "x in y")`
fn split_block(tag: &str) -> (&str, &str) {
    match tag.find(char::is_whitespace) {
        Some(i) => (&tag[..i], tag[i..].trim()),
        None => (tag, ""),
    }
}

/// The block tag that ended a run of nodes, as `(keyword, rest)`
type End = Option<(String, String)>;

struct Parser {
    tokens: std::vec::IntoIter<Token>,
}

impl Parser {
    /// Parses nodes until one of the `ends` keywords is reached, or until the input runs out
    fn nodes(&mut self, ends: &[&str]) -> Result<(Vec<Node>, End), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.next() {
            match token {
                Token::Text(text) => nodes.push(Node::Text(text)),
                Token::Var(path) => nodes.push(Node::Var(path)),
                Token::Block(tag) => {
                    let (keyword, rest) = split_block(&tag);
                    if ends.contains(&keyword) {
                        return Ok((nodes, Some((keyword.to_owned(), rest.to_owned()))));
                    }
                    match keyword {
                        "if" => nodes.push(self.if_block(rest)?),
                        "for" => nodes.push(self.for_block(rest)?),
                        "elif" | "else" | "endif" | "endfor" => {
                            return Err(TemplateError::UnexpectedBlock { tag: tag.clone() })
                        }
                        _ => return Err(TemplateError::UnsupportedBlock { tag: tag.clone() }),
                    }
                }
            }
        }
        Ok((nodes, None))
    }

    fn if_block(&mut self, condition: &str) -> Result<Node, TemplateError> {
        let unclosed = || TemplateError::Unclosed {
            block: format!("if {}", condition),
        };
        let mut branches = Vec::new();
        let mut condition = Condition::parse(condition)?;
        loop {
            let (body, end) = self.nodes(&["elif", "else", "endif"])?;
            branches.push((condition, body));
            match end {
                Some((keyword, rest)) if keyword == "elif" => condition = Condition::parse(&rest)?,
                Some((keyword, _)) if keyword == "else" => {
                    let (otherwise, end) = self.nodes(&["endif"])?;
                    end.ok_or_else(unclosed)?;
                    return Ok(Node::If { branches, otherwise });
                }
                Some(_) => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    })
                }
                None => return Err(unclosed()),
            }
        }
    }

    fn for_block(&mut self, head: &str) -> Result<Node, TemplateError> {
        let invalid = || TemplateError::InvalidExpression {
            expression: format!("for {}", head),
        };
        let caps = FOR_HEAD.captures(head).ok_or_else(invalid)?;
        let binding = caps.get(1).map(|m| m.as_str()).ok_or_else(invalid)?;
        if binding == LOOP {
            return Err(invalid());
        }
        let iterable = VarPath::parse(caps.get(2).map(|m| m.as_str().trim()).ok_or_else(invalid)?)?;

        let (body, end) = self.nodes(&["endfor"])?;
        if end.is_none() {
            return Err(TemplateError::Unclosed {
                block: format!("for {}", head),
            });
        }
        Ok(Node::For {
            binding: binding.to_owned(),
            iterable,
            body,
        })
    }
}

/// A path the template needs, and whether it's only needed under an `if`
struct Requirement<'a> {
    path: &'a VarPath,
    guarded: bool,
}

impl<'a> Requirement<'a> {
    fn is_met(&self, ctx: &Context) -> bool {
        if self.guarded {
            ctx.is_resolved(&self.path.segments[..1])
        } else {
            ctx.is_resolved(&self.path.segments[..])
        }
    }
}

fn collect<'a>(nodes: &'a [Node], bound: &mut Vec<&'a str>, guarded: bool, out: &mut Vec<Requirement<'a>>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Var(path) => require(path, guarded, bound, out),
            Node::If { branches, otherwise } => {
                for (condition, body) in branches {
                    require(&condition.path, true, bound, out);
                    collect(body, bound, true, out);
                }
                collect(otherwise, bound, true, out);
            }
            Node::For { binding, iterable, body } => {
                require(iterable, guarded, bound, out);
                bound.push(binding.as_str());
                bound.push(LOOP);
                collect(body, bound, guarded, out);
                bound.truncate(bound.len() - 2);
            }
        }
    }
}

fn require<'a>(path: &'a VarPath, guarded: bool, bound: &[&str], out: &mut Vec<Requirement<'a>>) {
    if !bound.contains(&path.root()) {
        out.push(Requirement { path, guarded });
    }
}

/// Loop variables in scope while rendering, innermost last
struct Scope<'a> {
    ctx: &'a Context,
    locals: Vec<(String, Value)>,
}

impl<'a> Scope<'a> {
    fn lookup(&self, path: &VarPath) -> Option<&Value> {
        let (root, rest) = path.segments.split_first()?;
        match self.locals.iter().rev().find(|(name, _)| name == root) {
            Some((_, value)) => lookup_in(value, rest),
            None => self.ctx.lookup(&path.segments[..]),
        }
    }

    fn is_true(&self, condition: &Condition) -> bool {
        self.lookup(&condition.path).map(is_truthy).unwrap_or(false) != condition.negated
    }
}

fn render_nodes(nodes: &[Node], scope: &mut Scope<'_>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(path) => match scope.lookup(path) {
                Some(value) => push_value(out, value),
                None => {
                    log::debug!("Template variable '{}' is undefined", path.segments.join("."));
                }
            },
            Node::If { branches, otherwise } => {
                let body = branches
                    .iter()
                    .find(|(condition, _)| scope.is_true(condition))
                    .map(|(_, body)| body)
                    .unwrap_or(otherwise);
                render_nodes(body, scope, out);
            }
            Node::For { binding, iterable, body } => {
                let items = match scope.lookup(iterable) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(Value::Object(obj)) => obj.keys().map(|k| Value::String(k.clone())).collect(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => {
                        log::debug!(
                            "Template variable '{}' is not iterable: {}",
                            iterable.segments.join("."),
                            other
                        );
                        Vec::new()
                    }
                };
                let length = items.len();
                for (index0, item) in items.into_iter().enumerate() {
                    let info = json!({
                        "index": index0 + 1,
                        "index0": index0,
                        "first": index0 == 0,
                        "last": index0 + 1 == length,
                        "length": length,
                    });
                    scope.locals.push((binding.clone(), item));
                    scope.locals.push((LOOP.to_owned(), info));
                    render_nodes(body, scope, out);
                    scope.locals.truncate(scope.locals.len() - 2);
                }
            }
        }
    }
}

/// A parsed template, which can be checked against a context and rendered any number of times
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

/// The result of `render`: either the complete text, or the variables that kept it from being rendered
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Text(String),
    Missing(BTreeSet<String>),
}

impl Template {
    pub fn parse(source: &str) -> Result<Template, TemplateError> {
        let mut parser = Parser {
            tokens: tokenize(source)?.into_iter(),
        };
        let (nodes, _) = parser.nodes(&[])?;
        Ok(Template { nodes })
    }

    /// The names of every top-level variable referenced by this template, not counting loop variables
    pub fn undeclared_variables(&self) -> BTreeSet<String> {
        self.requirements()
            .iter()
            .map(|req| req.path.root().to_owned())
            .collect()
    }

    /// The top-level variables whose referenced paths are absent or falsy in the given context
    pub fn missing_variables(&self, ctx: &Context) -> BTreeSet<String> {
        self.requirements()
            .iter()
            .filter(|req| !req.is_met(ctx))
            .map(|req| req.path.root().to_owned())
            .collect()
    }

    /// Renders without checking for missing variables. Unresolved paths render as empty strings.
    pub fn render(&self, ctx: &Context) -> String {
        let mut out = String::new();
        let mut scope = Scope {
            ctx,
            locals: Vec::new(),
        };
        render_nodes(&self.nodes, &mut scope, &mut out);
        out
    }

    fn requirements(&self) -> Vec<Requirement<'_>> {
        let mut out = Vec::new();
        collect(&self.nodes, &mut Vec::new(), false, &mut out);
        out
    }
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Null => {}
        other => out.push_str(&other.to_string()),
    }
}

/// Returns the set of top-level variables referenced by the template
pub fn find_undeclared_variables(template: &str) -> Result<BTreeSet<String>, TemplateError> {
    Template::parse(template).map(|t| t.undeclared_variables())
}

/// Renders the template against the context, with no check for missing variables
pub fn render_template(template: &str, ctx: &Context) -> Result<String, TemplateError> {
    Template::parse(template).map(|t| t.render(ctx))
}

/// Renders the template only if every variable it references is resolved in the context. Otherwise nothing
/// is rendered and the missing variable names are returned instead.
pub fn render(template: &str, ctx: &Context) -> Result<Rendered, TemplateError> {
    let template = Template::parse(template)?;
    let missing = template.missing_variables(ctx);
    if missing.is_empty() {
        Ok(Rendered::Text(template.render(ctx)))
    } else {
        Ok(Rendered::Missing(missing))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        Context::from_values(value.as_object().cloned().expect("context must be an object"))
    }

    fn names(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    #[test]
    fn renders_dotted_and_subscript_paths() {
        let ctx = ctx(json!({
            "pg": {"db_uri": "postgresql://u:p@h:5432/db", "ro_uris": ["a", "b"]},
            "mongodb-client": {"replica-set": "rs0"},
        }));
        let rendered = render_template(
            "DB: {{pg.db_uri}}\nRO: {{ pg.ro_uris[1] }}\nRS: {{ mongodb-client['replica-set'] }}",
            &ctx,
        )
        .unwrap();
        assert_eq!("DB: postgresql://u:p@h:5432/db\nRO: b\nRS: rs0", rendered);
    }

    #[test]
    fn comments_render_as_nothing() {
        let rendered = render_template("A: b{# ignored {{ nope }} #}", &Context::default()).unwrap();
        assert_eq!("A: b", rendered);
    }

    #[test]
    fn undeclared_variables_are_top_level_names() {
        let vars = find_undeclared_variables("A: {{ pg.db_uri }}\nB: {{ myrel.thing }}\nC: {{pg.conn_str}}").unwrap();
        assert_eq!(names(&["myrel", "pg"]), vars);
    }

    #[test]
    fn render_reports_missing_variables_and_renders_nothing() {
        let ctx = ctx(json!({"pg": {"db_uri": "x"}, "myrel": {"thing": ""}}));
        let result = render("A: {{ pg.db_uri }}\nB: {{ myrel.thing }}\nC: {{ other.thing }}", &ctx).unwrap();
        assert_eq!(Rendered::Missing(names(&["myrel", "other"])), result);
    }

    #[test]
    fn render_reports_namespace_when_field_is_absent() {
        let ctx = ctx(json!({"pg": {"conn_str": "host=h"}}));
        let result = render("DB: {{ pg.db_uri }}", &ctx).unwrap();
        assert_eq!(Rendered::Missing(names(&["pg"])), result);
    }

    #[test]
    fn if_blocks_guard_optional_fields() {
        let template = "{% if pg.standbys %}RO: {{ pg.standbys }}{% else %}RO: none{% endif %}";
        let with = ctx(json!({"pg": {"standbys": "host=s"}}));
        let without = ctx(json!({"pg": {"master": "host=m"}}));

        assert_eq!(Rendered::Text("RO: host=s".to_owned()), render(template, &with).unwrap());
        assert_eq!(Rendered::Text("RO: none".to_owned()), render(template, &without).unwrap());
        assert_eq!(
            Rendered::Missing(names(&["pg"])),
            render(template, &Context::default()).unwrap()
        );
    }

    #[test]
    fn elif_and_negated_conditions_pick_the_first_true_branch() {
        let template = "{% if not pg.master %}none{% elif pg.standbys %}both{% else %}master{% endif %}";
        let rendered = render_template(template, &ctx(json!({"pg": {"master": "m"}}))).unwrap();
        assert_eq!("master", rendered);
        let rendered = render_template(template, &ctx(json!({"pg": {"master": "m", "standbys": "s"}}))).unwrap();
        assert_eq!("both", rendered);
        let rendered = render_template(template, &ctx(json!({"pg": {"db_uri": "x"}}))).unwrap();
        assert_eq!("none", rendered);
    }

    #[test]
    fn for_blocks_bind_the_item_and_loop_info() {
        let ctx = ctx(json!({"pg": {"ro_uris": ["a", "b", "c"]}}));
        let template = "RO: {% for uri in pg.ro_uris %}{{ loop.index }}={{ uri }}{% if not loop.last %},{% endif %}{% endfor %}";
        assert_eq!(Rendered::Text("RO: 1=a,2=b,3=c".to_owned()), render(template, &ctx).unwrap());
    }

    #[test]
    fn loop_bound_names_are_not_undeclared() {
        let vars = find_undeclared_variables(
            "{% for host in myrel.hosts %}{{ host.name }}{{ loop.index0 }}{% endfor %}{{ pg.db_uri }}",
        )
        .unwrap();
        assert_eq!(names(&["myrel", "pg"]), vars);
    }

    #[test]
    fn for_iterable_must_be_resolved() {
        let template = "{% for uri in pg.ro_uris %}{{ uri }}{% endfor %}";
        let result = render(template, &ctx(json!({"pg": {"ro_uris": []}}))).unwrap();
        assert_eq!(Rendered::Missing(names(&["pg"])), result);
    }

    #[test]
    fn malformed_blocks_are_rejected() {
        assert_eq!(
            TemplateError::Unclosed {
                block: "if pg.db_uri".to_owned()
            },
            Template::parse("{% if pg.db_uri %}A: b").unwrap_err()
        );
        assert_eq!(
            TemplateError::Unclosed {
                block: "for x in y".to_owned()
            },
            Template::parse("{% for x in y %}{{ x }}").unwrap_err()
        );
        assert_eq!(
            TemplateError::UnexpectedBlock {
                tag: "endif".to_owned()
            },
            Template::parse("A: b{% endif %}").unwrap_err()
        );
        assert_eq!(
            TemplateError::UnsupportedBlock {
                tag: "set x = 1".to_owned()
            },
            Template::parse("{% set x = 1 %}").unwrap_err()
        );
        assert_eq!(
            TemplateError::InvalidExpression {
                expression: "for loop in y".to_owned()
            },
            Template::parse("{% for loop in y %}{% endfor %}").unwrap_err()
        );
    }

    #[test]
    fn unterminated_tags_are_rejected() {
        let err = Template::parse("A: ok\nB: {{ pg.db_uri").unwrap_err();
        assert_eq!(TemplateError::Unterminated { offset: 9 }, err);
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        for expr in &["{{ }}", "{{ pg.db_uri | upper }}", "{{ 'literal' }}", "{{ pg..x }}"] {
            match Template::parse(expr) {
                Err(TemplateError::InvalidExpression { .. }) => {}
                other => panic!("expected invalid expression for {}, got: {:?}", expr, other),
            }
        }
    }

    #[test]
    fn non_string_values_render_as_json() {
        let ctx = ctx(json!({"ns": {"port": 5432, "flag": true, "list": ["a"], "nothing": null}}));
        let rendered = render_template("{{ns.port}} {{ns.flag}} {{ns.list}} [{{ns.nothing}}]", &ctx).unwrap();
        assert_eq!(r#"5432 true ["a"] []"#, rendered);
    }
}
