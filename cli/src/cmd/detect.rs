use std::path::PathBuf;

use anyhow::Context as _;
use crosscheck_core::testing::TestOrchestrator;

use crate::util;

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Candidate project dir [default: project.dir]
    #[arg()]
    pub project: Option<PathBuf>,
}

pub fn exec(args: &Args, global_args: &GlobalArgs) -> SubcmdResult {
    let dir = match &args.project {
        Some(dir) => util::absolute(dir),
        None => util::load_config(global_args)?
            .project_dir()
            .context("No project dir given and no [project] dir in config")?,
    };
    let lang = TestOrchestrator::detect_language(&dir)?;
    println!("{}", lang);
    Ok(())
}
