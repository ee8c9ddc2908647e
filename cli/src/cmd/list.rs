use colored::Colorize;
use crosscheck_core::action;

use crate::util;

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Glob over case names
    #[arg()]
    pub filter: Option<String>,

    #[arg(short = 'l', long)]
    pub lib: Option<String>,
}

pub fn exec(args: &Args, global_args: &GlobalArgs) -> SubcmdResult {
    let cfg = util::load_config(global_args)?;
    let cases = action::find_cases(&cfg, args.lib.as_deref(), args.filter.as_deref())?;

    for case in &cases {
        let input = if case.input_path.is_some() {
            "(with input)".dimmed().to_string()
        } else {
            String::new()
        };
        println!("{} {}", case.name, input);
    }
    println!(
        "{} cases in {}",
        cases.len().to_string().bold(),
        cfg.testfiles_dir().to_string_lossy()
    );
    Ok(())
}
