//! Functions bundled with the stock agent binary.

use crate::envelope::CallArgs;
use crate::registry::{Module, Registry};

/// Largest input accepted by `algorithms.fibonacci`.
pub const MAX_FIBONACCI_INPUT: u64 = 50;

/// Naive recursive Fibonacci. Deliberately exponential: it is the reference
/// CPU-bound workload for exercising pools and timeouts.
pub fn fibonacci(n: u64) -> Result<u64, String> {
    if n > MAX_FIBONACCI_INPUT {
        return Err(format!(
            "fibonacci is only supported for n <= {MAX_FIBONACCI_INPUT}, got {n}"
        ));
    }
    Ok(naive_fibonacci(n))
}

fn naive_fibonacci(n: u64) -> u64 {
    match n {
        0 => 0,
        1 => 1,
        _ => naive_fibonacci(n - 1) + naive_fibonacci(n - 2),
    }
}

pub fn factorial(n: i64) -> Result<u64, String> {
    if n < 0 {
        return Err("Factorial of a negative number does not exist".to_string());
    }
    (1..=n as u64).try_fold(1u64, |acc, factor| {
        acc.checked_mul(factor)
            .ok_or_else(|| format!("factorial of {n} does not fit in 64 bits"))
    })
}

pub fn echo(message: &str) -> String {
    format!("ECHOING: {message}")
}

pub fn algorithms() -> Module {
    Module::new()
        .function("fibonacci", |call: &CallArgs| fibonacci(call.get(0, "n")?))
        .function("fib", |call: &CallArgs| fibonacci(call.get(0, "n")?))
        .function("factorial", |call: &CallArgs| factorial(call.get(0, "n")?))
}

pub fn echo_module() -> Module {
    Module::new().function("echo", |call: &CallArgs| {
        let message: String = call.get(0, "msg")?;
        Ok(echo(&message))
    })
}

pub fn builtin_registry() -> Registry {
    Registry::new()
        .module("algorithms", algorithms())
        .module("echo", echo_module())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fibonacci_matches_known_values() {
        let values: Vec<u64> = (0..10).map(|n| fibonacci(n).expect("in range")).collect();
        assert_eq!(values, vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);
    }

    #[test]
    fn fibonacci_rejects_large_inputs() {
        assert_eq!(
            fibonacci(51),
            Err("fibonacci is only supported for n <= 50, got 51".to_string())
        );
    }

    #[test]
    fn factorial_handles_edges() {
        assert_eq!(factorial(0), Ok(1));
        assert_eq!(factorial(5), Ok(120));
        assert_eq!(
            factorial(-1),
            Err("Factorial of a negative number does not exist".to_string())
        );
        assert!(factorial(21).is_err());
    }

    #[test]
    fn builtin_registry_lists_bundled_paths() {
        assert_eq!(
            builtin_registry().paths(),
            vec![
                "algorithms.factorial",
                "algorithms.fib",
                "algorithms.fibonacci",
                "echo.echo"
            ]
        );
    }
}
