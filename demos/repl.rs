use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tali::evaluator::{self, Environment};
use tali::lexer::tokenize_with_config;
use tali::parser::{ParseConfig, parse_with_config};
use tali::value::Value;

fn main() {
    env_logger::init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    println!("Tali expression evaluator");
    println!("Enter expressions like: (op: +, a: 1, b: 2)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let env = evaluator::create_global_env();

    // Callable from user code as (op: help)
    env.register_builtin_operation::<_, (), _>("help", &[], print_help);

    let config = ParseConfig {
        handle_comments: true,
        ..ParseConfig::default()
    };

    loop {
        match rl.readline("tali> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&env);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                // A line may hold several forms; stop at the first error
                for form in parse_with_config(tokenize_with_config(line, &config), &config) {
                    let result = form.and_then(|expr| evaluator::eval(&expr, &env));
                    match result {
                        // Definitions evaluate to unit, which is not echoed
                        Ok(Value::Unit) => {}
                        Ok(value) => println!("{value}"),
                        Err(e) => {
                            println!("Error: {e}");
                            break;
                        }
                    }
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() -> Value {
    println!("Tali interpreter:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Syntax:");
    println!("  Atoms: 42, -2.5, \"text\", true, name");
    println!("  Maps: (a: 1, b: 2)   Lists: [1 2 3]   Sets: {{1 2 3}}");
    println!("  Invocations: maps with an op, @ or f key");
    println!("  Comments: ; to end of line");
    println!();
    println!("Special forms:");
    println!("  (op: quote, q: E)");
    println!("  (op: if, p: P, t: THEN, f: ELSE)");
    println!("  (op: def, n: NAME, f: VALUE)");
    println!("  (op: def, n: NAME, p: [PARAMS], f: BODY)");
    println!("  (op: eval, e: E)");
    println!();
    println!("Primitives:");
    println!("  Arithmetic: +, -, *, /, // over a and b");
    println!("  Comparison: >, <, >=, <=, = over a and b");
    println!("  Collections: (op: idx, m: M, k: K), (op: bnd, m: M, k: K, v: V)");
    println!("  Output: (op: print, x: X)");
    println!();
    println!("Examples:");
    println!("  (op: +, a: 1, b: 2)");
    println!("  {{op: def, n: inc, p: [x], f: {{op: +, a: x, b: 1}}}}");
    println!("  (op: inc, x: 41)");
    println!("  (op: idx, m: (a: 1, b: 2), k: \"b\")");
    println!();

    Value::Unit
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate primitives from user-defined values
    let mut primitives = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Primitive { .. } => primitives.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !primitives.is_empty() {
        println!("Primitives ({}):", primitives.len());
        let mut col = 0;
        for name in primitives {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
