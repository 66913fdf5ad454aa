use super::EXIT_SUCCESS;
use atelier_core::CoreError;
use clap::CommandFactory;
use clap_complete::Shell;

#[allow(clippy::unnecessary_wraps)]
pub fn run<C: CommandFactory>(shell: Shell) -> Result<u8, CoreError> {
    clap_complete::generate(shell, &mut C::command(), "atelier", &mut std::io::stdout());
    Ok(EXIT_SUCCESS)
}
