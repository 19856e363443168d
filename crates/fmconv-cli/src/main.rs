use std::io;

fn main() {
    fmconv_core::init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = fmconv_cli::execute(&mut io::stdout().lock(), &args);
    std::process::exit(code);
}
