//! Dispatch of build actions.
//!
//! Placeholders in an action are substituted right before it runs, so an
//! action can use the store path of its own build and of realized dependencies.

pub mod cmd;
pub mod fs;

use std::collections::BTreeMap;
use std::path::Path;

use crate::build::BuildAction;
use crate::execute::env::BuildEnv;
use crate::execute::types::{ActionResult, ExecuteError};
use crate::placeholder::{self, Resolver};

pub use cmd::execute_cmd;

pub async fn execute_action(
  action: &BuildAction,
  resolver: &impl Resolver,
  out_dir: &Path,
  build_env: &BuildEnv,
) -> Result<ActionResult, ExecuteError> {
  match action {
    BuildAction::CopySource {
      src,
      content_hash,
      filter,
      to,
    } => {
      let to = placeholder::substitute(to, resolver)?;
      fs::copy_source(src, content_hash, *filter, &to).await?;
      Ok(ActionResult { output: to })
    }

    BuildAction::CopyTree { from, to } => {
      let from = placeholder::substitute(from, resolver)?;
      let to = placeholder::substitute(to, resolver)?;
      fs::copy_dir(&from, &to).await?;
      Ok(ActionResult { output: to })
    }

    BuildAction::Cmd { cmd, env, cwd } => {
      let cmd = placeholder::substitute(cmd, resolver)?;
      let env = env
        .iter()
        .map(|(k, v)| Ok((k.clone(), placeholder::substitute(v, resolver)?)))
        .collect::<Result<BTreeMap<_, _>, ExecuteError>>()?;
      let cwd = cwd.as_deref().map(|c| placeholder::substitute(c, resolver)).transpose()?;

      if let Some(dir) = &cwd {
        tokio::fs::create_dir_all(dir).await?;
      }
      let output = execute_cmd(&cmd, &env, cwd.as_deref(), out_dir, build_env).await?;
      Ok(ActionResult { output })
    }

    BuildAction::InstallBins { from, to, names } => {
      let from = placeholder::substitute(from, resolver)?;
      let to = placeholder::substitute(to, resolver)?;
      fs::install_bins(&from, &to, names).await?;
      Ok(ActionResult { output: to })
    }
  }
}
