use std::io::{self, IsTerminal, Read};

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use shed::error::Error;
use shed::eval::Interp;
use shed::printer;
use shed::reader;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut interp = Interp::new();

    // Process command-line flags
    let mut load_files: Vec<String> = Vec::new();
    let mut script: Option<String> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--load" => {
                if i + 1 < args.len() {
                    load_files.push(args[i + 1].clone());
                    i += 2;
                } else {
                    eprintln!("--load requires a file path");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("Usage: shed [OPTIONS] [FILE]");
                println!();
                println!("Options:");
                println!("  --load <file>    Load a source file before starting the REPL");
                println!("  --help, -h       Show this help message");
                println!();
                println!("With FILE, evaluate it and exit. Without, start a REPL");
                println!("(or evaluate stdin when piped).");
                println!();
                println!("Environment variables:");
                println!("  SHED_TRACE=1    Enable apply tracing");
                std::process::exit(0);
            }
            other if !other.starts_with('-') && script.is_none() => {
                script = Some(other.to_string());
                i += 1;
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!("Try 'shed --help' for usage information.");
                std::process::exit(1);
            }
        }
    }

    for path in &load_files {
        if let Err(e) = interp.load(path) {
            eprintln!("Error loading {}: {}", path, e);
            std::process::exit(1);
        }
    }

    if let Some(path) = script {
        match interp.load(&path) {
            Ok(_) => return,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }

    let stdin = io::stdin();
    if stdin.is_terminal() {
        if load_files.is_empty() {
            println!("shed scheme");
        } else {
            println!("shed scheme (loaded: {})", load_files.join(", "));
        }
        println!(
            "  Heap: {} cells, Symbols: {} interned",
            interp.heap.total_cells(),
            interp.symbols.count()
        );
        run_interactive(&mut interp);
    } else {
        run_piped(&mut interp);
    }
}

/// Interactive REPL: accumulate lines until parentheses balance.
fn run_interactive(interp: &mut Interp) {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Cannot initialize terminal: {}", e);
            return;
        }
    };
    let mut buf = String::new();
    let mut depth: i32 = 0;

    loop {
        let prompt = if depth == 0 { "> " } else { "  " };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buf.clear();
                depth = 0;
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        };

        // Naive depth tracking; strings with parens will confuse it, but
        // a complete form still evaluates correctly.
        for ch in line.chars() {
            match ch {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
        }

        buf.push_str(&line);
        buf.push('\n');

        if depth <= 0 {
            depth = 0;
            let input = buf.trim().to_string();
            buf.clear();
            if input.is_empty() {
                continue;
            }
            let _ = editor.add_history_entry(&input);
            if !eval_and_print(interp, &input) {
                break;
            }
        }
    }
}

/// Piped mode: read everything, evaluate form by form, print each value.
fn run_piped(interp: &mut Interp) {
    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        eprintln!("Failed to read input: {}", e);
        std::process::exit(1);
    }
    eval_and_print(interp, &input);
}

/// Evaluate every form in `input`, printing values and recoverable
/// errors. Returns false when the session should end.
fn eval_and_print(interp: &mut Interp, input: &str) -> bool {
    let forms = match reader::read_all(&mut interp.heap, &mut interp.symbols, input) {
        Ok(forms) => forms,
        Err(e) => {
            eprintln!("{}", e);
            return true;
        }
    };
    let holder = interp.heap.list(&forms);
    let slot = interp.heap.protect(holder);
    let mut keep_going = true;
    for form in forms {
        let env = interp.shadow_rootlet();
        match interp.eval(form, env) {
            Ok(val) => {
                println!("{}", printer::write_value(&interp.heap, &interp.symbols, val));
            }
            Err(Error::Quit) | Err(Error::Interrupted) => {
                keep_going = false;
                break;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
            }
        }
    }
    interp.heap.unprotect_at(slot);
    keep_going
}
