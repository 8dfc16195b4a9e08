//! Basic Sandbash usage example
//!
//! Run with: cargo run --example basic

use sandbash::Bash;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bash = Bash::new();

    let result = bash.exec("echo 'Hello, Sandbash!'").await?;
    println!("Output: {}", result.stdout);

    // Variables persist between calls
    bash.exec("NAME=World").await?;
    let result = bash.exec("echo \"Hello, $NAME!\"").await?;
    println!("Output: {}", result.stdout);

    // Pipelines over the virtual filesystem
    let result = bash
        .exec("printf 'apple\\nbanana\\ncherry\\n' > /tmp/fruit; grep an /tmp/fruit | sort -r")
        .await?;
    println!("Filtered: {}", result.stdout);

    // Parameter expansion and arithmetic
    let result = bash
        .exec("path=/data/report.final.csv; echo ${path##*/} ${path%%.*} $(( ${#path} * 2 ))")
        .await?;
    println!("Output: {}", result.stdout);

    let script = r#"
        for fruit in $(cat /tmp/fruit); do
            case $fruit in
                a*) echo "$fruit starts with a" ;;
                *) echo "$fruit" ;;
            esac
        done
    "#;
    let result = bash.exec(script).await?;
    println!("Loop output:\n{}", result.stdout);

    // Failures are exit codes, not errors
    let result = bash.exec("cat /missing").await?;
    println!("exit {}: {}", result.exit_code, result.stderr);

    Ok(())
}
