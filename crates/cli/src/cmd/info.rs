use anyhow::Result;
use serde::Serialize;

use flint_lib::gc::load_roots;
use flint_lib::platform::paths::{cache_dir, data_dir, inputs_cache_dir, roots_dir, store_dir};
use flint_lib::platform::{System, platform_triple};

use super::Context;
use crate::output::{print_json, print_stat};

#[derive(Serialize)]
struct Info {
  version: &'static str,
  platform: Option<String>,
  supported_systems: Vec<String>,
  store: String,
  data: String,
  cache: String,
  inputs: String,
  gc_roots: usize,
}

pub fn cmd_info(ctx: &Context) -> Result<()> {
  let info = Info {
    version: env!("CARGO_PKG_VERSION"),
    platform: platform_triple(),
    supported_systems: System::defaults().iter().map(System::triple).collect(),
    store: store_dir().display().to_string(),
    data: data_dir().display().to_string(),
    cache: cache_dir().display().to_string(),
    inputs: inputs_cache_dir().display().to_string(),
    gc_roots: load_roots(&roots_dir()).map(|r| r.len()).unwrap_or(0),
  };

  if ctx.output.is_json() {
    return print_json(&info);
  }

  println!("flint {}", info.version);
  match &info.platform {
    Some(triple) => print_stat("Platform", triple),
    None => print_stat("Platform", "unsupported"),
  }
  print_stat("Systems", &info.supported_systems.join(", "));
  print_stat("Store", &info.store);
  print_stat("Data", &info.data);
  print_stat("Cache", &info.cache);
  print_stat("Inputs", &info.inputs);
  print_stat("GC roots", &info.gc_roots.to_string());
  Ok(())
}
