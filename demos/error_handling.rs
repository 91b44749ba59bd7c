//! Example demonstrating how guest errors are reported.
//!
//! Guest exceptions are not host errors: they come back in the
//! `ExecutionResult` together with any output printed before them.
//!
//! Run with: cargo run --example error_handling

use ruby_wasm_runner::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let runner = RuntimeInstance::new(RunnerConfig::from_env());

    let cases = [
        ("Name error", "puts undefined_thing"),
        ("No method error", "nil.upcase"),
        ("Type error", "1 + 'one'"),
        ("Argument error", "def add(a, b) = a + b\nadd(1)"),
        ("Division by zero", "puts 'before'\n10 / 0"),
        ("Custom error", "class OutOfCoffee < StandardError; end\nraise OutOfCoffee, 'refill needed'"),
        ("Exit status", "exit 3"),
    ];

    for (title, code) in cases {
        println!("\n=== {} ===", title);
        let result = runner.execute_code(code, None, None).await?;
        if !result.output.is_empty() {
            println!("output: {}", result.output.trim_end());
        }
        match (&result.failure, result.guest_error()) {
            (_, Some(err)) => println!("kind: {:?}\n{}", err.kind, err.describe()),
            (Some(failure), None) => println!("failure: {}", failure.message()),
            (None, None) => println!("no error"),
        }
    }

    Ok(())
}
