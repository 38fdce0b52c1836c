//! # Query Parsing Tests
//!
//! End-to-end parser scenarios through the public API: clause structure,
//! operator precedence, associativity, error classification and the plain
//! AST round trip. Fine-grained denotation behaviour is covered by the unit
//! tests inside the parser module.

use latticedb::lql::{parse, AstNode, NodeName, ParseErrorKind, PlainNode};

#[test]
fn get_where_produces_the_expected_shape() {
    let ast = parse("demo", "get Song where name = \"Aria1\"").unwrap();

    assert_eq!(ast.name, NodeName::Get);

    let kind = &ast.children[0];
    assert_eq!(kind.name, NodeName::NodeKind);
    assert_eq!(kind.token.value, "Song");

    let where_clause = &ast.children[1];
    assert_eq!(where_clause.name, NodeName::Where);
    assert_eq!(where_clause.children.len(), 1);

    let eq = &where_clause.children[0];
    assert_eq!(eq.name, NodeName::Eq);
    assert_eq!(eq.children[0].name, NodeName::Value);
    assert_eq!(eq.children[0].token.value, "name");
    assert_eq!(eq.children[1].name, NodeName::Value);
    assert_eq!(eq.children[1].token.value, "Aria1");
}

#[test]
fn precedence_of_arithmetic_operators() {
    let ast = parse("demo", "1 + 2 * 3").unwrap();

    assert_eq!(ast.name, NodeName::Plus);
    assert_eq!(ast.children[0].token.value, "1");
    let times = &ast.children[1];
    assert_eq!(times.name, NodeName::Times);
    assert_eq!(times.children[0].token.value, "2");
    assert_eq!(times.children[1].token.value, "3");

    let ast = parse("demo", "(1 + 2) * 3").unwrap();

    assert_eq!(ast.name, NodeName::Times);
    let plus = &ast.children[0];
    assert_eq!(plus.name, NodeName::Plus);
    assert_eq!(plus.children[0].token.value, "1");
    assert_eq!(plus.children[1].token.value, "2");
    assert_eq!(ast.children[1].token.value, "3");
}

#[test]
fn parenthesisation_matters_only_when_it_changes_precedence() {
    assert_eq!(
        parse("demo", "1 + (2 * 3)").unwrap(),
        parse("demo", "1 + 2 * 3").unwrap()
    );
    assert_ne!(
        parse("demo", "(1 + 2) * 3").unwrap(),
        parse("demo", "1 + 2 * 3").unwrap()
    );
}

#[test]
fn equal_precedence_operators_are_left_associative() {
    let ast = parse("demo", "a and b and c").unwrap();

    assert_eq!(ast.name, NodeName::And);
    let inner = &ast.children[0];
    assert_eq!(inner.name, NodeName::And);
    assert_eq!(inner.children[0].token.value, "a");
    assert_eq!(inner.children[1].token.value, "b");
    assert_eq!(ast.children[1].token.value, "c");
}

#[test]
fn show_clause_with_as_and_format_suffixes() {
    let ast = parse("demo", "get Song show name as Title, @count() format %d").unwrap();

    let show = &ast.children[1];
    assert_eq!(show.name, NodeName::Show);
    assert_eq!(show.children.len(), 2);

    let first = &show.children[0];
    assert_eq!(first.name, NodeName::ShowTerm);
    assert_eq!(first.token.value, "name");
    let as_suffix = &first.children[0];
    assert_eq!(as_suffix.name, NodeName::As);
    assert_eq!(as_suffix.children[0].token.value, "Title");

    let second = &show.children[1];
    assert_eq!(second.name, NodeName::ShowTerm);
    let func = &second.children[0];
    assert_eq!(func.name, NodeName::Func);
    assert_eq!(func.children.len(), 1);
    assert_eq!(func.children[0].token.value, "count");
    let format_suffix = &second.children[1];
    assert_eq!(format_suffix.name, NodeName::Format);
    assert_eq!(format_suffix.children[0].token.value, "%d");
}

#[test]
fn incomplete_queries_fail_with_unexpected_end() {
    assert_eq!(
        parse("demo", "get").unwrap_err().kind,
        ParseErrorKind::UnexpectedEnd
    );
    assert_eq!(
        parse("demo", "1 +").unwrap_err().kind,
        ParseErrorKind::UnexpectedEnd
    );
}

#[test]
fn plus_doubles_as_a_prefix_operator() {
    let ast = parse("demo", "+ 1").unwrap();

    assert_eq!(ast.name, NodeName::Plus);
    assert_eq!(ast.children.len(), 1);
    assert_eq!(ast.children[0].token.value, "1");
}

#[test]
fn plain_round_trip_preserves_structure() {
    let ast = parse(
        "demo",
        "get Song where name = \"Aria1\" traverse PartOf:Album end show name as T format %s",
    )
    .unwrap();

    let plain = ast.plain();
    let json = serde_json::to_string(&plain).unwrap();
    let decoded: PlainNode = serde_json::from_str(&json).unwrap();
    let rebuilt = AstNode::from_plain(&decoded).unwrap();

    assert_eq!(decoded, plain);
    assert_eq!(rebuilt, ast);
    assert_eq!(rebuilt.plain(), plain);
}
