//! Example demonstrating simulated input and timeouts.
//!
//! This example shows how to:
//! - Feed lines to `gets`
//! - See `gets` return nil once input runs out
//! - Stop a runaway loop with a timeout
//!
//! Run with: cargo run --example input_and_timeout

use std::time::{Duration, Instant};
use ruby_wasm_runner::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Input and Timeout Example ===\n");

    let runner = global_runner();

    println!("--- Test 1: Reading input ---");
    let code = r#"
name = gets.chomp
age = gets.to_i
puts "Hello #{name}! Next year you will be #{age + 1}."
"#;
    let result = runner.execute_code(code, Some("Alice\n25"), None).await?;
    println!("output: {}", result.output.trim());

    println!("\n--- Test 2: Running out of input ---");
    let code = r#"
while (line = gets)
  puts "got #{line.chomp}"
end
puts "no more input"
"#;
    let result = runner.execute_code(code, Some("one\ntwo"), None).await?;
    println!("output:\n{}", result.output);

    println!("\n--- Test 3: Infinite loop ---");
    let started = Instant::now();
    let result = runner
        .execute_code("loop { }", None, Some(Duration::from_secs(2)))
        .await?;
    println!("timed out: {}", result.is_timeout());
    println!("error: {}", result.error.unwrap_or_default());
    println!("returned after {:?}", started.elapsed());

    println!("\n--- Test 4: Runtime still works ---");
    let result = runner.execute_code("puts :still_here", None, None).await?;
    println!("output: {}", result.output.trim());

    Ok(())
}
