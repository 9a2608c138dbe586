use sift::{Document, OptimizedPredicateSet, Predicate};

const FIRST_EXPRESSION: &str = "server matches 'east-web-([0-9]+)' and errors contains 'CPU load'";
const SECOND_EXPRESSION: &str = "load > 1.0 and environment is not 'test'";
const THIRD_EXPRESSION: &str = "{'WARN' 'ERR' 'CRIT'} contains error_level or load > 3.0";
const FOURTH_EXPRESSION: &str = "environment is 'prod' and load > 1.0";

fn main() {
    // Register the subscriptions
    let mut set = OptimizedPredicateSet::new();
    for expression in [
        FIRST_EXPRESSION,
        SECOND_EXPRESSION,
        THIRD_EXPRESSION,
        FOURTH_EXPRESSION,
    ] {
        let predicate = Predicate::new(expression);
        if !predicate.is_valid() {
            for error in predicate.errors() {
                eprintln!("{expression}: {error}");
            }
            continue;
        }
        set.add(predicate).unwrap();
    }
    set.compile_ast();
    println!("Decision tree:\n{}", set.description().unwrap());

    // Build the incoming event
    let event = Document::new()
        .with("server", "east-web-001")
        .with("errors", vec!["CPU load", "disk full"])
        .with("load", sift::Decimal::new(21, 1))
        .with("environment", "prod")
        .with("error_level", "WARN");

    // Match it against the population
    for matched in set.evaluate(&event) {
        println!("Matched: \"{}\"", matched.source());
    }
}
