//! Basic example of running Ruby code.
//!
//! Run with: cargo run --example basic_execution
//!
//! Note: downloads ruby+stdlib.wasm on first run and caches it on disk.

use std::time::Duration;
use ruby_wasm_runner::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RunnerConfig::builder()
        .default_timeout(Duration::from_secs(10))
        .build();

    println!("Creating runner with config: {:?}", config);
    let runner = RuntimeInstance::new(config);

    // Warm up before the first program
    if let Err(e) = runner.initialize().await {
        eprintln!("Failed to load the interpreter: {}", e);
        return Err(e);
    }
    println!("Runtime state: {:?}", runner.state());

    println!("\n=== Test 1: Simple arithmetic ===");
    let result = runner.execute_code("puts 1 + 1", None, None).await?;
    println!("output: {}", result.output);

    println!("\n=== Test 2: Loop execution ===");
    let code = r#"
5.times do |i|
  puts "Count: #{i}"
end
"#;
    let result = runner.execute_code(code, None, None).await?;
    println!("output:\n{}", result.output);

    println!("\n=== Test 3: Syntax check ===");
    for source in ["def greet\n  puts 'hi'\nend", "def greet\n  puts 'hi'\n"] {
        let check = runner.check_syntax(source);
        match check.error {
            None => println!("valid: {:?}", source),
            Some(diag) => println!(
                "invalid at line {}, column {}: {}",
                diag.line, diag.column, diag.message
            ),
        }
    }

    Ok(())
}
