use std::path::PathBuf;

use clap::{Parser, Subcommand};

use gbasm_core::Options;

#[derive(Debug, Parser)]
#[command(
    name = "gbasm",
    version,
    about = "Game Boy (SM83) assembler",
    long_about = None,
    override_usage = "gbasm [COMMAND] [INPUT]",
    after_help = "Examples:\n  gbasm game.asm\n  gbasm game.asm -o build/game.gbo -I lib/\n  gbasm dump build/game.gbo\n  gbasm --help"
)]
struct Cli {
    /// Optional explicit subcommand.
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input source file.
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Object file output path; defaults to the input with a .gbo extension.
    #[arg(short = 'o', long = "output", value_name = "OUTPUT_FILE")]
    output: Option<PathBuf>,

    /// Directory to search for INCLUDE/INCBIN files. May be repeated.
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Byte used to fill reserved space in ROM sections.
    #[arg(
        short = 'p',
        long = "pad-value",
        value_name = "BYTE",
        default_value = "0",
        value_parser = parse_byte
    )]
    pad_value: u8,

    /// Default fixed-point precision, in fractional bits (1-31).
    #[arg(
        short = 'Q',
        long = "q-precision",
        value_name = "BITS",
        default_value_t = 16
    )]
    q_precision: u8,

    /// Maximum nesting of INCLUDE and REPT/FOR contexts.
    #[arg(
        short = 'r',
        long = "recursion-depth",
        value_name = "DEPTH",
        default_value_t = 64
    )]
    recursion_depth: usize,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the contents of an assembled object file.
    Dump(DumpArgs),
}

#[derive(Debug, Parser)]
struct DumpArgs {
    /// Object file (.gbo).
    #[arg(value_name = "OBJECT_FILE")]
    object: PathBuf,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let Cli {
        command,
        input,
        output,
        include,
        pad_value,
        q_precision,
        recursion_depth,
    } = Cli::parse();

    match command {
        Some(Commands::Dump(args)) => dump_command(&args.object),
        None => {
            let Some(input) = input else {
                print_banner();
                println!();
                let mut command = <Cli as clap::CommandFactory>::command();
                command.print_help()?;
                println!();
                return Ok(());
            };
            let options = Options {
                pad_byte: pad_value,
                include_paths: include,
                max_recursion_depth: recursion_depth,
                q_precision,
            };
            assemble_command(&options, &input, output)
        }
    }
}

fn print_banner() {
    println!("gbasm, version {}.", env!("CARGO_PKG_VERSION"));
    println!("An assembler for the Game Boy's SM83 CPU.");
}

fn parse_byte(text: &str) -> Result<u8, String> {
    let (digits, radix) = if let Some(hex) = text.strip_prefix('$') {
        (hex, 16)
    } else if let Some(hex) = text.strip_prefix("0x") {
        (hex, 16)
    } else {
        (text, 10)
    };
    u8::from_str_radix(digits, radix).map_err(|_| format!("invalid pad byte '{text}'"))
}

fn assemble_command(
    options: &Options,
    input: &std::path::Path,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let result = gbasm_core::assemble_file(input, options)
        .map_err(|err| anyhow::anyhow!("{}", err.rendered.trim_end()))?;

    if !result.rendered_warnings.trim().is_empty() {
        eprintln!("{}", result.rendered_warnings.trim_end());
    }

    let out_path = output.unwrap_or_else(|| input.with_extension("gbo"));
    gbasm_obj::write_object(&out_path, &result.object)?;
    Ok(())
}

fn dump_command(path: &std::path::Path) -> anyhow::Result<()> {
    let object = gbasm_obj::read_object(path)?;

    println!("{} section(s):", object.sections.len());
    for section in &object.sections {
        let mut line = format!(
            "  {} {} size=${:X}",
            section.kind.name(),
            section.name,
            section.size
        );
        match section.modifier {
            gbasm_obj::SectionModifier::Normal => {}
            gbasm_obj::SectionModifier::Union => line.push_str(" UNION"),
            gbasm_obj::SectionModifier::Fragment => line.push_str(" FRAGMENT"),
        }
        if let Some(org) = section.org {
            line.push_str(&format!(" org=${org:04X}"));
        }
        if let Some(bank) = section.bank {
            line.push_str(&format!(" bank={bank}"));
        }
        if section.align > 0 {
            line.push_str(&format!(
                " align[{}, {}]",
                section.align, section.align_ofs
            ));
        }
        if !section.patches.is_empty() {
            line.push_str(&format!(" patches={}", section.patches.len()));
        }
        println!("{line}");
    }

    println!("{} symbol(s):", object.symbols.len());
    for symbol in &object.symbols {
        let exported = if symbol.exported { " (exported)" } else { "" };
        match &symbol.definition {
            gbasm_obj::SymbolDefinition::Label { section, offset } => {
                let owner = object
                    .sections
                    .get(*section as usize)
                    .map(|section| section.name.as_str())
                    .unwrap_or("?");
                println!("  {} = {owner}+${offset:X}{exported}", symbol.name);
            }
            gbasm_obj::SymbolDefinition::Constant { value } => {
                println!("  {} = {value}{exported}", symbol.name);
            }
        }
    }

    Ok(())
}
