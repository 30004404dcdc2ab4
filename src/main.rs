use fortress_interp::{
    driver::Driver,
    project::{FileRepository, FortressConfig},
    tools::{
        diagnostics::{report_fault, report_manifest_error},
        tester::run_component_tests,
    },
};
use std::env;
use std::io;
use std::process;

const USAGE: &str = "Usage: fortress [run|test|link] <Component> [args...] [-v]";

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 2 {
        eprintln!("{USAGE}");
        process::exit(1);
    }

    let command = args[0].as_str();
    let component = args[1].as_str();
    let rest = &args[2..];

    let cwd = match env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("Could not read the current directory: {err}");
            process::exit(1);
        }
    };
    let config = match FortressConfig::discover(&cwd) {
        Ok(config) => config,
        Err(err) => {
            report_manifest_error(&err);
            process::exit(1);
        }
    };
    let repository = FileRepository::from_config(&config);
    let driver = Driver::new(config);

    match command {
        "run" => match driver.run_program(&repository, component, rest) {
            Ok(_) => {}
            Err(fault) => {
                report_fault(&fault);
                process::exit(1);
            }
        },
        "test" => {
            let verbose = rest.iter().any(|arg| arg == "-v" || arg == "--verbose");
            let mut stdout = io::stdout();
            match run_component_tests(&driver, &repository, component, verbose, &mut stdout) {
                Ok(summary) if summary.is_ok() => {}
                Ok(_) => process::exit(1),
                Err(message) => {
                    eprintln!("{message}");
                    process::exit(1);
                }
            }
        }
        "link" => {
            let session = match driver.link(component, &repository) {
                Ok(session) => session,
                Err(fault) => {
                    report_fault(&fault);
                    process::exit(1);
                }
            };
            for name in session.discovery_order() {
                println!("{name}");
            }
        }
        _ => {
            eprintln!("Unknown command `{command}`");
            eprintln!("{USAGE}");
            process::exit(1);
        }
    }
}
