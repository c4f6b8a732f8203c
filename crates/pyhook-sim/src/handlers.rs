use std::collections::BTreeSet;
use std::path::Path;

use pyhook_proto::{CATCH_ALL, HandlerRegion};

use crate::ast::{Expr, Stmt, StmtKind};
use crate::error::Result;
use crate::parser::{for_each_block, parse_module};

/// Lists the exception handler regions of a source file.
///
/// This is what a controller answers when the debugger requests the
/// handlers of a file.
pub fn handler_regions_of_file(path: &Path) -> Result<Vec<HandlerRegion>> {
    let source = std::fs::read_to_string(path)?;
    handler_regions(&source, &path.display().to_string())
}

/// Lists the exception handler regions of some source code.
///
/// Each `try` statement with `except` clauses yields a region spanning from
/// the `try` line to the first `except` line (excluded), holding the
/// expressions naming the caught classes. Nested function and class bodies
/// are included.
pub fn handler_regions(source: &str, filename: &str) -> Result<Vec<HandlerRegion>> {
    let module = parse_module(source, filename)?;

    let mut regions = Vec::new();
    collect(&module.body, &mut regions);

    regions.sort_by_key(|region| region.line_start);
    Ok(regions)
}

fn collect(body: &[Stmt], regions: &mut Vec<HandlerRegion>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Def(def) => collect(&def.body, regions),
            StmtKind::Class { body, .. } => collect(&body.body, regions),
            StmtKind::Try { handlers, .. } if !handlers.is_empty() => {
                let mut expressions = BTreeSet::new();

                for handler in handlers {
                    match &handler.class {
                        None => {
                            expressions.insert(CATCH_ALL.to_owned());
                        }
                        Some(Expr::Tuple(classes)) => {
                            expressions.extend(classes.iter().filter_map(Expr::dotted_name));
                        }
                        Some(class) => expressions.extend(class.dotted_name()),
                    }
                }

                if expressions.is_empty() {
                    expressions.insert(CATCH_ALL.to_owned());
                }

                regions.push(HandlerRegion {
                    line_start: stmt.line,
                    line_end: handlers[0].line,
                    expressions,
                });
            }
            _ => (),
        }

        for_each_block(&stmt.kind, |block| collect(block, regions));
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pyhook_proto::CATCH_ALL;

    use super::handler_regions;

    #[test]
    fn regions_of_nested_handlers() {
        let regions = handler_regions(
            indoc! {"
                import errors

                def f():
                    try:
                        x = 1
                        y = 2
                    except (ValueError, errors.Custom):
                        pass
                    except KeyError as e:
                        pass

                try:
                    f()
                except:
                    pass
            "},
            "prog.py",
        )
        .unwrap();

        assert_eq!(regions.len(), 2);

        assert_eq!(regions[0].line_start, 4);
        assert_eq!(regions[0].line_end, 7);
        assert_eq!(
            regions[0].expressions.iter().map(String::as_str).collect::<Vec<_>>(),
            ["KeyError", "ValueError", "errors.Custom"]
        );

        assert_eq!(regions[1].line_start, 12);
        assert_eq!(regions[1].line_end, 14);
        assert!(regions[1].expressions.contains(CATCH_ALL));
    }

    #[test]
    fn finally_only_is_not_a_handler() {
        let regions = handler_regions(
            indoc! {"
                try:
                    pass
                finally:
                    pass
            "},
            "prog.py",
        )
        .unwrap();

        assert!(regions.is_empty());
    }
}
