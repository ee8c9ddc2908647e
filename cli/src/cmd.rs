pub mod build;
pub mod detect;
pub mod init;
pub mod list;
pub mod test;

use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct GlobalArgs {
    #[command(subcommand)]
    pub subcmd: Subcommand,

    /// Config file to use instead of searching for crosscheck.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    Init(init::Args),
    Detect(detect::Args),

    #[command(alias("b"))]
    Build(build::Args),

    #[command(alias("ls"))]
    List(list::Args),

    #[command(alias("t"))]
    Test(test::Args),
}

pub type SubcmdResult = anyhow::Result<()>;

impl GlobalArgs {
    pub async fn exec_subcmd(&self) -> SubcmdResult {
        use Subcommand::*;
        match &self.subcmd {
            Init(args) => init::exec(args, self),
            Detect(args) => detect::exec(args, self),
            Build(args) => build::exec(args, self).await,
            List(args) => list::exec(args, self),
            Test(args) => test::exec(args, self).await,
        }
    }
}

#[cfg(test)]
mod test_args {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_test_subcommand() {
        let app = GlobalArgs::try_parse_from([
            "crosscheck", "test", "A/*", "-l", "A", "-j", "8", "--timeout", "2000", "--report",
            "out.json",
        ])
        .unwrap();
        let Subcommand::Test(args) = app.subcmd else {
            panic!("not a test subcommand")
        };
        assert_eq!(args.filter.as_deref(), Some("A/*"));
        assert_eq!(args.lib.as_deref(), Some("A"));
        assert_eq!(args.jobs.map(|j| j.get()), Some(8));
        assert_eq!(args.timeout, Some(2000));
        assert_eq!(args.report, Some(PathBuf::from("out.json")));
        assert_eq!(args.project, None);
    }

    #[test]
    fn config_flag_is_global() {
        let app = GlobalArgs::try_parse_from(["crosscheck", "build", "--config", "x.toml"]).unwrap();
        assert_eq!(app.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn zero_jobs_are_rejected() {
        assert!(GlobalArgs::try_parse_from(["crosscheck", "test", "-j", "0"]).is_err());
    }
}
