use std::path::PathBuf;

use crosscheck_core::testing::TestOrchestrator;
use crosscheck_core::{action, print_success};

use crate::util;

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Candidate project dir [default: project.dir]
    #[arg(short = 'p', long)]
    pub project: Option<PathBuf>,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs) -> SubcmdResult {
    let cfg = util::load_config(global_args)?;
    let orch = TestOrchestrator::for_project(cfg, args.project.as_ref().map(util::absolute))?;

    let report = action::do_build(&orch).await?;
    print_success!(
        "Successfully built {} candidate: {}",
        orch.language(),
        report
            .artifact
            .as_deref()
            .unwrap_or(orch.project_dir())
            .to_string_lossy()
    );
    Ok(())
}
