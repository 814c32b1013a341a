use super::super::args::*;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Sign(args) => super::sign::run(args).await,
    }
}
