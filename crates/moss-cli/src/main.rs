use std::{env, fs::File, io::BufReader, process::ExitCode};

use moss::{BytecodeReader, Machine};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        eprintln!("usage: moss <program.msb>");
        return ExitCode::FAILURE;
    };

    let file = match File::open(file_path) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("error: cannot open {file_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let code = match BytecodeReader::new(BufReader::new(file)).read() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: malformed bytecode in {file_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut machine = Machine::new(code, file_path);
    let exit_code = machine.run();
    ExitCode::from(u8::try_from(exit_code.rem_euclid(256)).unwrap_or(1))
}
