use crate::db::models::Complexity;
use tree_sitter::Node;

/// Cyclomatic complexity (1 + decision points) and line span of a node.
pub fn measure(node: Node) -> Complexity {
    let loc = (node.end_position().row - node.start_position().row + 1) as u32;
    Complexity {
        cyclomatic: 1 + count_decision_points(node),
        loc,
    }
}

fn count_decision_points(root: Node) -> u32 {
    let mut count = 0;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let kind = node.kind();
        if is_decision_point(kind) {
            count += 1;
        }
        if matches!(
            kind,
            "binary_expression" | "boolean_operator"
        ) {
            let mut cursor = node.walk();
            count += node
                .children(&mut cursor)
                .filter(|c| matches!(c.kind(), "&&" | "||" | "and" | "or"))
                .count() as u32;
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    count
}

fn is_decision_point(kind: &str) -> bool {
    matches!(
        kind,
        "if_statement"
            | "if_expression"
            | "elif_clause"
            | "while_statement"
            | "while_expression"
            | "do_statement"
            | "for_statement"
            | "for_in_statement"
            | "for_expression"
            | "loop_expression"
            | "switch_case"
            | "expression_case"
            | "type_case"
            | "match_arm"
            | "case_clause"
            | "catch_clause"
            | "except_clause"
            | "ternary_expression"
            | "conditional_expression"
    )
}
