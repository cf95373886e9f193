use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use directories::ProjectDirs;
use log::LevelFilter;

use edhost::{ConsoleStatus, DiskResources, DiskSettings, MemoryViews, TokioTimeouts};
use sarcina::{Operation, PackageDisabler};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger with debug fallback for development
    let mut logger = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        logger.filter_level(LevelFilter::Info);
        logger.filter_module("sarcina", LevelFilter::Debug);
    }
    logger.init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (root, command) = match parse_root(&args) {
        Some(parsed) => parsed,
        None => {
            print_usage();
            return Ok(());
        }
    };

    let root = match root {
        Some(root) => root,
        None => match default_root() {
            Some(root) => root,
            None => {
                eprintln!("エラー: データディレクトリを特定できませんでした");
                eprintln!("--root か SARCINA_ROOT で場所を指定してください");
                return Err(anyhow::anyhow!("データディレクトリが不明です"));
            }
        },
    };
    log::debug!("Using data root {}", root.display());

    let disabler = PackageDisabler::new(
        Arc::new(DiskSettings::new(root.join("Settings"))),
        Arc::new(DiskResources::new(root.join("Packages"))),
        Arc::new(MemoryViews::new()),
        Arc::new(ConsoleStatus::new()),
        Arc::new(TokioTimeouts::new()),
    );

    if let Err(e) = run_command(&disabler, &command).await {
        eprintln!("エラー: {}", e);
        return Err(e);
    }
    Ok(())
}

/// Splits an optional leading `--root <path>` off the argument list.
/// `None` means the arguments were unusable and usage should be shown.
fn parse_root(args: &[String]) -> Option<(Option<PathBuf>, Vec<String>)> {
    if args.is_empty() {
        return None;
    }
    if args[0] == "--root" {
        if args.len() < 3 {
            return None;
        }
        return Some((Some(PathBuf::from(&args[1])), args[2..].to_vec()));
    }
    Some((None, args.to_vec()))
}

fn default_root() -> Option<PathBuf> {
    if let Ok(root) = std::env::var("SARCINA_ROOT") {
        return Some(PathBuf::from(root));
    }

    ProjectDirs::from("com", "sarcina", "sarcina").map(|dirs| dirs.data_dir().to_path_buf())
}

async fn run_command(disabler: &PackageDisabler, command: &[String]) -> Result<()> {
    match command[0].as_str() {
        "list" => {
            let ignored = disabler.get_ignored_packages()?;
            let in_process = disabler.get_in_process_packages()?;
            if ignored.is_empty() && in_process.is_empty() {
                println!("無効化済みパッケージはありません");
            }
            for package in &ignored {
                println!("{}", package);
            }
            if !in_process.is_empty() {
                println!();
                println!("処理中:");
                for package in &in_process {
                    println!("  {}", package);
                }
            }
        }
        "disable" if command.len() >= 3 => {
            let operation = Operation::from_str(&command[1])?;
            let disabled = disabler.disable_packages(command[2..].to_vec(), operation)?;
            println!("{} 個のパッケージを無効化しました", disabled.len());
            for package in &disabled {
                println!("  {}", package);
            }
        }
        "enable" if command.len() >= 3 => {
            let operation = Operation::from_str(&command[1])?;
            let reenabled = disabler.reenable_packages(command[2..].to_vec(), operation)?;
            println!("{} 個のパッケージを再有効化しました", reenabled.len());
            for package in &reenabled {
                println!("  {}", package);
            }
            wait_for_restore(operation).await;
        }
        "recover" => {
            let recovered = disabler.reenable_in_process()?;
            println!("{} 個のパッケージを復旧しました", recovered.len());
            wait_for_restore(Operation::Enable).await;
        }
        "version" if command.len() == 2 => {
            println!("{}", disabler.get_version(&command[1]));
        }
        _ => {
            print_usage();
            return Err(anyhow::anyhow!("不明なコマンドです: {}", command.join(" ")));
        }
    }
    Ok(())
}

/// The deferred restore runs on the runtime after the restore delay;
/// exiting earlier would drop it on the floor.
async fn wait_for_restore(operation: Operation) {
    if !operation.backs_up_appearance() {
        return;
    }
    tokio::time::sleep(sarcina::disabler::RESTORE_DELAY + std::time::Duration::from_millis(100))
        .await;
}

fn print_usage() {
    eprintln!("使い方: sarcina [--root <パス>] <コマンド>");
    eprintln!();
    eprintln!("コマンド:");
    eprintln!("  list                          無効化済みパッケージを表示");
    eprintln!("  disable <操作> <パッケージ...>  パッケージを無効化");
    eprintln!("  enable <操作> <パッケージ...>   パッケージを再有効化");
    eprintln!("  recover                       前回の実行が残した処理中リストを再有効化");
    eprintln!("  version <パッケージ>           パッケージのバージョンを表示");
    eprintln!();
    eprintln!("操作: install / upgrade / remove / disable / enable");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_test_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_root_without_flag() {
        let (root, command) = parse_root(&args(&["list"])).unwrap();
        assert!(root.is_none());
        assert_eq!(command, vec!["list"]);
    }

    #[test]
    fn test_parse_root_with_flag() {
        let (root, command) = parse_root(&args(&["--root", "/tmp/data", "list"])).unwrap();
        assert_eq!(root, Some(PathBuf::from("/tmp/data")));
        assert_eq!(command, vec!["list"]);
    }

    #[test]
    fn test_parse_root_rejects_incomplete_arguments() {
        assert!(parse_root(&[]).is_none());
        assert!(parse_root(&args(&["--root", "/tmp/data"])).is_none());
    }

    #[test]
    fn test_default_root_prefers_environment() {
        let _guard = env_test_lock().lock().unwrap();
        let previous = std::env::var("SARCINA_ROOT").ok();

        std::env::set_var("SARCINA_ROOT", "/tmp/sarcina-test-root");
        assert_eq!(
            default_root(),
            Some(PathBuf::from("/tmp/sarcina-test-root"))
        );

        match previous {
            Some(value) => std::env::set_var("SARCINA_ROOT", value),
            None => std::env::remove_var("SARCINA_ROOT"),
        }
    }
}
