use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Arg, Command};

mod pible;

use pible::compiler::{CompileError, CompileOptions, CompileTarget, Compiler};

fn main() -> ExitCode {
    let matches = Command::new("pible")
        .version(env!("CARGO_PKG_VERSION"))
        .about("HolyC to BPF Compiler - In Memory of Terry A. Davis")
        .long_about(
            "A divine bridge between Terry Davis's HolyC and BPF runtimes, \
             allowing HolyC programs to run in Linux kernel and Solana blockchain.",
        )
        .arg(
            Arg::new("input")
                .help("HolyC source file to compile")
                .required(true)
                .value_name("FILE")
                .index(1),
        )
        .arg(
            Arg::new("target")
                .long("target")
                .help("Compilation target")
                .value_name("TARGET")
                .default_value("linux-bpf")
                .value_parser(["linux-bpf", "solana-bpf", "bpf-vm"]),
        )
        .arg(
            Arg::new("generate-idl")
                .long("generate-idl")
                .help("Generate an Interface Definition Language document for exported functions")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("enable-vm-testing")
                .long("enable-vm-testing")
                .help("Execute the compiled program in the built-in BPF VM")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .help("Output path for the compiled object (default: <source>.bpf)")
                .value_name("PATH"),
        )
        .get_matches();

    let input_file = matches.get_one::<String>("input").expect("required by clap");
    let target = match matches.get_one::<String>("target").expect("defaulted").as_str() {
        "linux-bpf" => CompileTarget::LinuxBpf,
        "solana-bpf" => CompileTarget::SolanaBpf,
        "bpf-vm" => CompileTarget::BpfVm,
        _ => unreachable!(), // clap ensures valid values
    };

    let options = CompileOptions {
        target,
        generate_idl: matches.get_flag("generate-idl"),
        enable_vm_testing: matches.get_flag("enable-vm-testing"),
        output_path: matches.get_one::<String>("output").cloned(),
        ..Default::default()
    };

    // Exit 0 on success, 1 on compile errors, 2 on I/O errors.
    ExitCode::from(run(input_file, &options))
}

fn run(input_file: &str, options: &CompileOptions) -> u8 {
    let source = match fs::read_to_string(input_file)
        .with_context(|| format!("failed to read {}", input_file))
    {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: {:#}", err);
            return 2;
        }
    };

    let program_name = Path::new(input_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("program")
        .to_string();

    let compiler = Compiler::new();
    let output = match compiler.compile_named(&source, &program_name, options) {
        Ok(output) => output,
        Err(CompileError::Io(err)) => {
            eprintln!("error: {}", err);
            return 2;
        }
        Err(err) => {
            eprintln!("{}: {}", input_file, err.render(&source));
            return 1;
        }
    };

    let output_path = options.output_path.clone().unwrap_or_else(|| {
        Path::new(input_file)
            .with_extension("bpf")
            .to_string_lossy()
            .into_owned()
    });

    if let Err(err) = fs::write(&output_path, &output.bytecode)
        .with_context(|| format!("failed to write {}", output_path))
    {
        eprintln!("error: {:#}", err);
        return 2;
    }
    println!("Compiled successfully: {} -> {}", input_file, output_path);

    if let Some(idl) = &output.idl {
        let idl_path = Path::new(&output_path)
            .with_extension("json")
            .to_string_lossy()
            .into_owned();
        if let Err(err) =
            fs::write(&idl_path, idl).with_context(|| format!("failed to write {}", idl_path))
        {
            eprintln!("error: {:#}", err);
            return 2;
        }
        println!("IDL generated: {}", idl_path);
    }

    if let Some(result) = &output.vm_result {
        println!(
            "VM test completed: exit_code={}, steps={}",
            result.exit_code, result.steps
        );
    }

    0
}
