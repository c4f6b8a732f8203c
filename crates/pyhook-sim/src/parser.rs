use std::sync::Arc;

use chumsky::error::Rich;
use chumsky::prelude::*;
use chumsky::{Boxed, select};
use pyhook_debugger::runtime::CodeInfo;

use crate::ast::{BinOp, CmpOp, CodeBody, Expr, Handler, Stmt, StmtKind, UnaryOp};
use crate::error::{Error, Result};
use crate::lexer::{LexError, Tok, Token, error_message, tokenize};

const KEYWORDS: &[&str] = &[
    "and", "as", "break", "class", "continue", "def", "elif", "else", "except", "False",
    "finally", "for", "global", "if", "import", "in", "is", "None", "not", "or", "pass",
    "raise", "return", "True", "try", "while",
];

type Tokens<'a> = &'a [Token];
type Err<'a> = extra::Err<Rich<'a, Token>>;

/// Statement with the last line it spans.
type Spanned = (Stmt, i32);

/// Statements of a block with the last line they span.
#[derive(Debug)]
struct Block {
    body: Vec<Stmt>,
    last_line: i32,
}

impl From<Vec<Spanned>> for Block {
    fn from(stmts: Vec<Spanned>) -> Self {
        let last_line = stmts.last().map_or(0, |(_, last_line)| *last_line);

        Self {
            body: stmts.into_iter().map(|(stmt, _)| stmt).collect(),
            last_line,
        }
    }
}

enum Trailer {
    Call(Vec<Expr>),
    Index(Expr),
    Attr(String),
}

enum AssignTail {
    Assign(Expr),
    Aug(BinOp, Expr),
}

/// Parses the source code of a module.
pub fn parse_module(source: &str, filename: &str) -> Result<Arc<CodeBody>> {
    let tokens = lex(source, filename)?;

    let block = Block::from(
        statement()
            .repeated()
            .collect::<Vec<_>>()
            .then_ignore(end())
            .parse(tokens.as_slice())
            .into_result()
            .map_err(|errors| syntax_error(&errors, &tokens, filename))?,
    );

    Ok(Arc::new(finish_body(
        CodeInfo::MODULE_NAME.to_owned(),
        Vec::new(),
        block.body,
        1,
        block.last_line.max(1),
    )))
}

/// Parses a single expression, spanning the whole source.
pub fn parse_expression(source: &str) -> Result<Expr> {
    let tokens = lex(source, CodeInfo::STRING_FILENAME)?;

    let expr = tuple_list(expression())
        .then_ignore(newline().or_not())
        .then_ignore(end())
        .parse(tokens.as_slice())
        .into_result()
        .map_err(|errors| syntax_error(&errors, &tokens, CodeInfo::STRING_FILENAME))?;

    Ok(expr)
}

/// Parses some statements.
pub fn parse_statements(source: &str) -> Result<Vec<Stmt>> {
    let tokens = lex(source, CodeInfo::STRING_FILENAME)?;

    let stmts = statement()
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(end())
        .parse(tokens.as_slice())
        .into_result()
        .map_err(|errors| syntax_error(&errors, &tokens, CodeInfo::STRING_FILENAME))?;

    Ok(Block::from(stmts).body)
}

fn lex(source: &str, filename: &str) -> Result<Vec<Token>> {
    tokenize(source).map_err(|LexError { line, message }| Error::Syntax {
        filename: filename.to_owned(),
        line,
        message,
    })
}

fn syntax_error(errors: &[Rich<'_, Token>], tokens: &[Token], filename: &str) -> Error {
    let (line, message) = errors.first().map_or_else(
        || (tokens.last().map_or(1, |t| t.line), "invalid syntax".to_owned()),
        |error| {
            let token = tokens.get(error.span().start).or_else(|| tokens.last());
            (token.map_or(1, |t| t.line), error_message(error))
        },
    );

    Error::Syntax {
        filename: filename.to_owned(),
        line,
        message,
    }
}

fn op<'a>(symbol: &'static str) -> impl Parser<'a, Tokens<'a>, (), Err<'a>> + Clone {
    any()
        .filter(move |t: &Token| t.tok == Tok::Op(symbol))
        .ignored()
        .labelled(symbol)
}

fn keyword<'a>(word: &'static str) -> impl Parser<'a, Tokens<'a>, (), Err<'a>> + Clone {
    any()
        .filter(move |t: &Token| matches!(&t.tok, Tok::Name(name) if name == word))
        .ignored()
        .labelled(word)
}

fn name<'a>() -> impl Parser<'a, Tokens<'a>, String, Err<'a>> + Clone {
    select! {
        Token { tok: Tok::Name(name), .. } if !KEYWORDS.contains(&name.as_str()) => name
    }
    .labelled("name")
}

/// Line of the next token, without consuming it.
fn line<'a>() -> impl Parser<'a, Tokens<'a>, i32, Err<'a>> + Clone {
    any().map(|t: Token| t.line).rewind()
}

/// End of a logical line, giving its last physical line.
fn newline<'a>() -> impl Parser<'a, Tokens<'a>, i32, Err<'a>> + Clone {
    select! { Token { tok: Tok::Newline, line } => line }.labelled("newline")
}

fn indent<'a>() -> impl Parser<'a, Tokens<'a>, (), Err<'a>> + Clone {
    select! { Token { tok: Tok::Indent, .. } => () }.labelled("indented block")
}

fn dedent<'a>() -> impl Parser<'a, Tokens<'a>, (), Err<'a>> + Clone {
    select! { Token { tok: Tok::Dedent, .. } => () }
}

fn binary(left: Expr, (op, right): (BinOp, Expr)) -> Expr {
    Expr::Binary(op, Box::new(left), Box::new(right))
}

fn tuple_of(first: Expr, rest: Option<Vec<Expr>>) -> Expr {
    match rest {
        None => first,
        Some(rest) => Expr::Tuple(std::iter::once(first).chain(rest).collect()),
    }
}

/// `item (, item)* [,]`, a tuple when a comma is present.
fn tuple_list<'a, P>(item: P) -> impl Parser<'a, Tokens<'a>, Expr, Err<'a>> + Clone
where
    P: Parser<'a, Tokens<'a>, Expr, Err<'a>> + Clone,
{
    let rest = op(",").ignore_then(
        item.clone()
            .separated_by(op(","))
            .allow_trailing()
            .collect::<Vec<_>>(),
    );

    item.then(rest.or_not())
        .map(|(first, rest)| tuple_of(first, rest))
}

/// Atoms followed by calls, subscripts and attribute references.
fn primary<'a, P>(expr: P) -> impl Parser<'a, Tokens<'a>, Expr, Err<'a>> + Clone
where
    P: Parser<'a, Tokens<'a>, Expr, Err<'a>> + Clone,
{
    let literal = select! {
        Token { tok: Tok::Int(value), .. } => Expr::Int(value),
        Token { tok: Tok::Float(value), .. } => Expr::Float(value),
        Token { tok: Tok::Bytes(bytes), .. } => Expr::Bytes(bytes.into()),
        Token { tok: Tok::Name(name), .. } if name == "None" => Expr::None,
        Token { tok: Tok::Name(name), .. } if name == "True" => Expr::Bool(true),
        Token { tok: Tok::Name(name), .. } if name == "False" => Expr::Bool(false)
    };

    // adjacent string literals are concatenated
    let string = select! { Token { tok: Tok::Str(text), .. } => text }
        .repeated()
        .at_least(1)
        .collect::<Vec<_>>()
        .map(|parts| Expr::Str(parts.concat().into()));

    let items = expr
        .clone()
        .separated_by(op(","))
        .allow_trailing()
        .collect::<Vec<_>>();

    let parenthesized = tuple_list(expr.clone())
        .or_not()
        .map(|inner| inner.unwrap_or_else(|| Expr::Tuple(Vec::new())))
        .delimited_by(op("("), op(")"));

    let list = items.clone().delimited_by(op("["), op("]")).map(Expr::List);

    let dict = expr
        .clone()
        .then_ignore(op(":"))
        .then(expr.clone())
        .separated_by(op(","))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(op("{"), op("}"))
        .map(Expr::Dict);

    let atom = choice((
        literal,
        string,
        name().map(Expr::Name),
        parenthesized,
        list,
        dict,
    ));

    let trailer = choice((
        items.delimited_by(op("("), op(")")).map(Trailer::Call),
        tuple_list(expr)
            .delimited_by(op("["), op("]"))
            .map(Trailer::Index),
        op(".").ignore_then(name()).map(Trailer::Attr),
    ));

    atom.foldl(trailer.repeated(), |base, trailer| match trailer {
        Trailer::Call(args) => Expr::Call(Box::new(base), args),
        Trailer::Index(index) => Expr::Index(Box::new(base), Box::new(index)),
        Trailer::Attr(attr) => Expr::Attr(Box::new(base), attr),
    })
}

/// Full expression, down to boolean operators.
fn expression<'a>() -> Boxed<'a, 'a, Tokens<'a>, Expr, Err<'a>> {
    recursive(|expr| {
        let primary = primary(expr).boxed();

        let factor = recursive(|factor| {
            let power = primary
                .clone()
                .then(op("**").ignore_then(factor.clone()).or_not())
                .map(|(base, exponent)| match exponent {
                    Some(exponent) => Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)),
                    None => base,
                });

            let sign = choice((op("-").to(UnaryOp::Neg), op("+").to(UnaryOp::Pos)));

            sign.then(factor)
                .map(|(op, operand)| Expr::Unary(op, Box::new(operand)))
                .or(power)
        });

        let term_op = choice((
            op("*").to(BinOp::Mul),
            op("/").to(BinOp::Div),
            op("//").to(BinOp::FloorDiv),
            op("%").to(BinOp::Mod),
        ));
        let term = factor
            .clone()
            .foldl(term_op.then(factor).repeated(), binary);

        let arith_op = choice((op("+").to(BinOp::Add), op("-").to(BinOp::Sub)));
        let arith = term
            .clone()
            .foldl(arith_op.then(term).repeated(), binary)
            .boxed();

        let compare_op = choice((
            op("==").to(CmpOp::Eq),
            op("!=").to(CmpOp::Ne),
            op("<=").to(CmpOp::Le),
            op("<").to(CmpOp::Lt),
            op(">=").to(CmpOp::Ge),
            op(">").to(CmpOp::Gt),
            keyword("in").to(CmpOp::In),
            keyword("not").then(keyword("in")).to(CmpOp::NotIn),
            keyword("is").then(keyword("not")).to(CmpOp::IsNot),
            keyword("is").to(CmpOp::Is),
        ));
        let comparison = arith
            .clone()
            .then(compare_op.then(arith).repeated().collect::<Vec<_>>())
            .map(|(left, ops)| {
                if ops.is_empty() {
                    left
                } else {
                    Expr::Compare(Box::new(left), ops)
                }
            });

        let not = keyword("not")
            .repeated()
            .foldr(comparison, |(), operand| Expr::Unary(UnaryOp::Not, Box::new(operand)));

        let and = not.clone().foldl(
            keyword("and").ignore_then(not).repeated(),
            |left, right| Expr::And(Box::new(left), Box::new(right)),
        );

        and.clone().foldl(
            keyword("or").ignore_then(and).repeated(),
            |left, right| Expr::Or(Box::new(left), Box::new(right)),
        )
    })
    .boxed()
}

/// Statement, compound statements included.
fn statement<'a>() -> Boxed<'a, 'a, Tokens<'a>, Spanned, Err<'a>> {
    let expr = expression();
    let expr_list = tuple_list(expr.clone()).boxed();
    let target_list = tuple_list(primary(expr.clone())).boxed();

    let aug_op = choice((
        op("+=").to(BinOp::Add),
        op("-=").to(BinOp::Sub),
        op("*=").to(BinOp::Mul),
    ));

    let assignment = expr_list
        .clone()
        .then(
            choice((
                op("=").ignore_then(expr_list.clone()).map(AssignTail::Assign),
                aug_op
                    .then(expr.clone())
                    .map(|(op, value)| AssignTail::Aug(op, value)),
            ))
            .or_not(),
        )
        .try_map(|(target, tail), span| {
            let invalid = |message: &str| Rich::custom(span, message);

            match tail {
                None => Ok(StmtKind::Expr(target)),
                Some(AssignTail::Assign(value)) => {
                    check_target(&target).map_err(invalid)?;
                    Ok(StmtKind::Assign { target, value })
                }
                Some(AssignTail::Aug(op, value)) => {
                    if matches!(target, Expr::Tuple(_) | Expr::List(_)) {
                        return Err(invalid("illegal expression for augmented assignment"));
                    }
                    check_target(&target).map_err(invalid)?;
                    Ok(StmtKind::AugAssign { target, op, value })
                }
            }
        });

    let simple = choice((
        keyword("pass").map(|()| StmtKind::Pass),
        keyword("break").map(|()| StmtKind::Break),
        keyword("continue").map(|()| StmtKind::Continue),
        keyword("return")
            .ignore_then(expr_list.clone().or_not())
            .map(StmtKind::Return),
        keyword("raise")
            .ignore_then(expr.clone().or_not())
            .map(StmtKind::Raise),
        keyword("import").ignore_then(name()).map(StmtKind::Import),
        keyword("global")
            .ignore_then(name().separated_by(op(",")).at_least(1).collect::<Vec<_>>())
            .map(StmtKind::Global),
        assignment,
    ))
    .boxed();

    let simple_line = line()
        .then(simple)
        .then(newline())
        .map(|((line, kind), last_line)| (Stmt { line, kind }, last_line));

    recursive(|statement| {
        let suite = statement
            .repeated()
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(indent(), dedent())
            .map(Block::from);

        let block = op(":")
            .ignore_then(choice((
                newline().ignore_then(suite),
                simple_line.clone().map(|stmt| Block::from(vec![stmt])),
            )))
            .boxed();

        let if_stmt = keyword("if")
            .ignore_then(expr.clone())
            .then(block.clone())
            .then(
                keyword("elif")
                    .ignore_then(expr.clone())
                    .then(block.clone())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .then(keyword("else").ignore_then(block.clone()).or_not())
            .map(|((first, elifs), orelse)| {
                let mut last_line = 0;
                let mut branches = Vec::new();

                for (test, block) in std::iter::once(first).chain(elifs) {
                    last_line = block.last_line;
                    branches.push((test, block.body));
                }

                let orelse = orelse.map_or_else(Vec::new, |block| {
                    last_line = block.last_line;
                    block.body
                });

                (StmtKind::If { branches, orelse }, last_line)
            });

        let while_stmt = keyword("while")
            .ignore_then(expr.clone())
            .then(block.clone())
            .map(|(test, block)| {
                let last_line = block.last_line;
                (StmtKind::While { test, body: block.body }, last_line)
            });

        let for_stmt = keyword("for")
            .ignore_then(target_list)
            .then_ignore(keyword("in"))
            .then(expr_list.clone())
            .then(block.clone())
            .map(|((target, iter), block)| {
                let last_line = block.last_line;
                (StmtKind::For { target, iter, body: block.body }, last_line)
            });

        let params = name()
            .separated_by(op(","))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(op("("), op(")"));

        let def_stmt = line()
            .then_ignore(keyword("def"))
            .then(name())
            .then(params)
            .then(block.clone())
            .map(|(((line, name), params), block)| {
                let last_line = block.last_line;
                let body = finish_body(name, params, block.body, line, last_line);
                (StmtKind::Def(Arc::new(body)), last_line)
            });

        let base = expr
            .clone()
            .or_not()
            .delimited_by(op("("), op(")"))
            .or_not()
            .map(Option::flatten);

        let class_stmt = line()
            .then_ignore(keyword("class"))
            .then(name())
            .then(base)
            .then(block.clone())
            .map(|(((line, name), base), block)| {
                let last_line = block.last_line;
                let body = finish_body(name, Vec::new(), block.body, line, last_line);
                (StmtKind::Class { base, body: Arc::new(body) }, last_line)
            });

        let handler = line()
            .then_ignore(keyword("except"))
            .then(
                expr.clone()
                    .then(keyword("as").ignore_then(name()).or_not())
                    .or_not(),
            )
            .then(block.clone())
            .map(|((line, clause), block)| {
                let (class, name) = match clause {
                    Some((class, name)) => (Some(class), name),
                    None => (None, None),
                };

                let handler = Handler {
                    line,
                    class,
                    name,
                    body: block.body,
                };

                (handler, block.last_line)
            });

        let finally = keyword("finally").ignore_then(block.clone());

        let try_stmt = keyword("try")
            .ignore_then(block)
            .then(choice((
                handler
                    .repeated()
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .then(finally.clone().or_not()),
                finally.map(|finally| (Vec::new(), Some(finally))),
            )))
            .map(|(body, (handlers, finally))| {
                let mut last_line = body.last_line;

                let handlers = handlers
                    .into_iter()
                    .map(|(handler, handler_last)| {
                        last_line = handler_last;
                        handler
                    })
                    .collect();

                let finally = finally.map_or_else(Vec::new, |block| {
                    last_line = block.last_line;
                    block.body
                });

                let kind = StmtKind::Try {
                    body: body.body,
                    handlers,
                    finally,
                };

                (kind, last_line)
            });

        let compound = choice((
            if_stmt, while_stmt, for_stmt, def_stmt, class_stmt, try_stmt,
        ))
        .boxed();

        line()
            .then(compound)
            .map(|(line, (kind, last_line))| (Stmt { line, kind }, last_line))
            .or(simple_line)
    })
    .boxed()
}

fn finish_body(
    name: String,
    params: Vec<String>,
    body: Vec<Stmt>,
    first_line: i32,
    last_line: i32,
) -> CodeBody {
    let mut globals = Vec::new();
    collect_globals(&body, &mut globals);

    let mut var_names = params.clone();
    collect_assigned(&body, &mut var_names);
    var_names.retain(|n| !globals.contains(n));

    CodeBody {
        name,
        params,
        body,
        first_line,
        last_line,
        var_names,
        globals,
    }
}

fn check_target(expr: &Expr) -> core::result::Result<(), &'static str> {
    match expr {
        Expr::Name(_) | Expr::Attr(..) | Expr::Index(..) => Ok(()),
        Expr::Tuple(items) | Expr::List(items) => items.iter().try_for_each(check_target),
        _ => Err("cannot assign to expression"),
    }
}

fn collect_globals(body: &[Stmt], globals: &mut Vec<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Global(names) => globals.extend(names.iter().cloned()),
            _ => for_each_block(&stmt.kind, |block| collect_globals(block, globals)),
        }
    }
}

fn collect_assigned(body: &[Stmt], names: &mut Vec<String>) {
    fn push(names: &mut Vec<String>, name: &str) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_owned());
        }
    }

    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { target, .. }
            | StmtKind::AugAssign { target, .. }
            | StmtKind::For { target, .. } => {
                let mut targets = Vec::new();
                target_names(target, &mut targets);
                for name in targets {
                    push(names, &name);
                }
            }
            StmtKind::Def(def) | StmtKind::Class { body: def, .. } => push(names, &def.name),
            StmtKind::Import(name) => push(names, name),
            StmtKind::Try { handlers, .. } => {
                for name in handlers.iter().filter_map(|h| h.name.as_deref()) {
                    push(names, name);
                }
            }
            _ => (),
        }

        for_each_block(&stmt.kind, |block| collect_assigned(block, names));
    }
}

fn target_names(target: &Expr, names: &mut Vec<String>) {
    match target {
        Expr::Name(name) => names.push(name.clone()),
        Expr::Tuple(items) | Expr::List(items) => {
            for item in items {
                target_names(item, names);
            }
        }
        _ => (),
    }
}

/// Invokes `f` on every nested block of a statement, excluding function and
/// class bodies.
pub(crate) fn for_each_block<F>(kind: &StmtKind, mut f: F)
where
    F: FnMut(&[Stmt]),
{
    match kind {
        StmtKind::If { branches, orelse } => {
            for (_, body) in branches {
                f(body);
            }
            f(orelse);
        }
        StmtKind::While { body, .. } | StmtKind::For { body, .. } => f(body),
        StmtKind::Try {
            body,
            handlers,
            finally,
        } => {
            f(body);
            for handler in handlers {
                f(&handler.body);
            }
            f(finally);
        }
        _ => (),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{parse_expression, parse_module, parse_statements};
    use crate::ast::{BinOp, CmpOp, Expr, StmtKind, UnaryOp};
    use crate::error::Error;

    #[test]
    fn function_locals() {
        let module = parse_module(
            indoc! {"
                counter = 0

                def bump(step):
                    global counter
                    total = counter + step
                    for i in range(2):
                        total += i
                    counter = total
                    return total
            "},
            "main.py",
        )
        .unwrap();

        assert_eq!(module.last_line, 9);

        let StmtKind::Def(def) = &module.body[1].kind else {
            panic!("not a def");
        };

        assert_eq!(module.body[1].line, 3);
        assert_eq!(def.first_line, 3);
        assert_eq!(def.last_line, 9);
        assert_eq!(def.params, ["step"]);
        assert_eq!(def.var_names, ["step", "total", "i"]);
        assert_eq!(def.globals, ["counter"]);
    }

    #[test]
    fn try_handlers() {
        let module = parse_module(
            indoc! {"
                try:
                    x = 1
                except (KeyError, errors.Custom) as e:
                    pass
                except:
                    pass
                finally:
                    y = 2
            "},
            "main.py",
        )
        .unwrap();

        let StmtKind::Try {
            body,
            handlers,
            finally,
        } = &module.body[0].kind
        else {
            panic!("not a try");
        };

        assert_eq!(body.len(), 1);
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].line, 3);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert!(handlers[1].class.is_none());
        assert_eq!(finally[0].line, 8);
    }

    #[test]
    fn chained_comparison() {
        let expr = parse_expression("1 < x <= 3 and y not in z").unwrap();

        let Expr::And(left, right) = expr else {
            panic!("not an and");
        };

        assert!(matches!(*left, Expr::Compare(_, ref ops) if ops.len() == 2));
        assert!(matches!(*right, Expr::Compare(_, ref ops) if ops[0].0 == CmpOp::NotIn));
    }

    #[test]
    fn dotted_names() {
        let expr = parse_expression("a.b.c").unwrap();
        assert_eq!(expr.dotted_name().as_deref(), Some("a.b.c"));

        let expr = parse_expression("a.b()").unwrap();
        assert_eq!(expr.dotted_name(), None);
    }

    #[test]
    fn statements_are_not_expressions() {
        assert!(parse_expression("x = 1").is_err());
        assert!(parse_expression("1 +").is_err());
    }

    #[test]
    fn syntax_error_line() {
        let err = parse_module("x = 1\ny = (\n", "bad.py").unwrap_err();
        assert!(err.to_string().starts_with("bad.py:"));

        let err = parse_module("x = 1\nif x\n    y = 2\n", "bad.py").unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 2, .. }));
    }

    #[test]
    fn multiline_statements_extend_bodies() {
        let module = parse_module(
            indoc! {"
                def build(a):
                    if a:
                        return 1
                    else:
                        items = [a,
                                 a + 1]
                        return items
                x = build(1)
            "},
            "main.py",
        )
        .unwrap();

        let StmtKind::Def(def) = &module.body[0].kind else {
            panic!("not a def");
        };

        assert_eq!(def.last_line, 7);
        assert_eq!(module.body[1].line, 8);
        assert_eq!(module.last_line, 8);

        let StmtKind::If { branches, orelse } = &def.body[0].kind else {
            panic!("not an if");
        };

        assert_eq!(branches.len(), 1);
        assert_eq!(orelse[0].line, 5);
        assert_eq!(orelse[1].line, 7);
    }

    #[test]
    fn single_line_blocks() {
        let body = parse_statements("while x: x -= 1\nclass A(Base): pass\n").unwrap();

        assert!(matches!(&body[0].kind, StmtKind::While { body, .. } if body.len() == 1));
        assert!(matches!(&body[1].kind, StmtKind::Class { base: Some(_), .. }));
        assert_eq!(body[1].line, 2);
    }

    #[test]
    fn operator_precedence() {
        let expr = parse_expression("-2 ** 2 + 3 * 4").unwrap();

        let Expr::Binary(BinOp::Add, left, right) = expr else {
            panic!("not an addition");
        };

        assert!(matches!(*left, Expr::Unary(UnaryOp::Neg, ref operand)
            if matches!(**operand, Expr::Binary(BinOp::Pow, ..))));
        assert!(matches!(*right, Expr::Binary(BinOp::Mul, ..)));

        let expr = parse_expression("not a is not b").unwrap();
        assert!(matches!(expr, Expr::Unary(UnaryOp::Not, ref operand)
            if matches!(**operand, Expr::Compare(_, ref ops) if ops[0].0 == CmpOp::IsNot)));
    }

    #[test]
    fn collections_and_tuples() {
        assert!(matches!(parse_expression("()").unwrap(), Expr::Tuple(ref items) if items.is_empty()));
        assert!(matches!(parse_expression("(1,)").unwrap(), Expr::Tuple(ref items) if items.len() == 1));
        assert!(matches!(parse_expression("(1)").unwrap(), Expr::Int(1)));
        assert!(matches!(parse_expression("1, 2").unwrap(), Expr::Tuple(ref items) if items.len() == 2));
        assert!(matches!(parse_expression("[1, 2,]").unwrap(), Expr::List(ref items) if items.len() == 2));
        assert!(matches!(parse_expression("{'a': 1}").unwrap(), Expr::Dict(ref items) if items.len() == 1));
        assert!(matches!(parse_expression("'a' 'b'").unwrap(), Expr::Str(ref text) if &**text == "ab"));
        assert!(matches!(parse_expression("f(x)[0].y").unwrap(), Expr::Attr(..)));
    }

    #[test]
    fn invalid_statements() {
        let err = parse_statements("f() = 1").unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 1, .. }));

        assert!(parse_statements("a, b += 1").is_err());
        assert!(parse_statements("try:\n    pass\nx = 1\n").is_err());
        assert!(parse_statements("if x:\ny = 1\n").is_err());
        assert!(parse_statements("  x = 1\n").is_err());
    }

    #[test]
    fn loop_targets() {
        let body = parse_statements("for k, v in items:\n    pass\n").unwrap();

        let StmtKind::For { target, iter, .. } = &body[0].kind else {
            panic!("not a for");
        };

        assert!(matches!(target, Expr::Tuple(items) if items.len() == 2));
        assert!(matches!(iter, Expr::Name(name) if name == "items"));
    }
}
