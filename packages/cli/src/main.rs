use cu::pre::*;

mod cmds;
mod tools;

fn main() -> std::process::ExitCode {
    let args = <cmds::CmdMain as clap::Parser>::parse();
    match cmds::main(args) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(fatal) => {
            cu::error!("{}", fatal.message);
            std::process::ExitCode::from(fatal.code)
        }
    }
}
