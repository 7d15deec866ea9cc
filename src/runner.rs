use std::sync::{atomic::AtomicBool, Arc};

use able_vm::{Interpreter, RuntimeConfig, RuntimeError, Value};
use colored::*;
use log::info;

use crate::demos::Demo;

/// 运行一个示例并打印输出；出错时附带解释器上下文
pub fn run_demo(
    name: &str,
    demo: &Demo,
    config: RuntimeConfig,
    interrupted: Arc<AtomicBool>,
    dump_state: bool,
) -> Result<Value, RuntimeError> {
    info!("running demo '{}' with {:?}", name, config);
    let (ast, root) = demo.build();
    let mut interpreter = Interpreter::new(config).with_interrupt(interrupted);

    let result = interpreter.run(&ast, root);
    for line in interpreter.take_output() {
        println!("{}", line);
    }

    match result {
        Ok(value) => {
            println!("{} {}", "=>".green().bold(), value.repr());
            if dump_state {
                print_context(&interpreter);
            }
            Ok(value)
        }
        Err(RuntimeError::Exit(code)) => Err(RuntimeError::Exit(code)),
        Err(error) => {
            eprintln!("\n{}", "--- Runtime Error Occurred ---".red().bold());
            eprintln!("An unrecoverable error was caught at the top level.");
            eprintln!("\n{}", "Error Details:".yellow().underline());
            eprintln!("{error}");
            eprintln!(
                "\n{}",
                "Full Execution Context at Time of Crash:"
                    .yellow()
                    .underline()
            );
            print_context(&interpreter);
            Err(error)
        }
    }
}

fn print_context(interpreter: &Interpreter) {
    match serde_json::to_string_pretty(&interpreter.format_context()) {
        Ok(text) => eprintln!("{text}"),
        Err(e) => eprintln!("{} {e}", "Failed to format context:".red()),
    }
}
