//! ホストコマンドの実装
//!
//! 無効化済みパッケージを選択して再有効化する対話フロー。

use std::sync::{Arc, Mutex};

use anyhow::Result;

use edhost::StatusSink;

use crate::disabler::PackageDisabler;
use crate::operation::Operation;

/// Two-step command that lets the user pick a disabled package and turn
/// it back on.
///
/// `run` snapshots the candidates for the host's picker; `on_done`
/// completes the flow with the picked index. The snapshot is kept so a
/// pick stays valid even if the ignored list changes while the picker is
/// open.
pub struct EnablePackageCommand {
    disabler: PackageDisabler,
    status: Arc<dyn StatusSink>,
    disabled_packages: Mutex<Vec<String>>,
}

impl EnablePackageCommand {
    pub fn new(disabler: PackageDisabler, status: Arc<dyn StatusSink>) -> Self {
        Self {
            disabler,
            status,
            disabled_packages: Mutex::new(Vec::new()),
        }
    }

    /// Collects the packages available to enable. An empty return means
    /// there was nothing to pick and the user has already been told.
    pub fn run(&self) -> Result<Vec<String>> {
        let packages: Vec<String> = self.disabler.get_ignored_packages()?.into_iter().collect();
        if packages.is_empty() {
            self.status
                .show_error("There are no disabled packages to enable");
            return Ok(packages);
        }

        let mut retained = self
            .disabled_packages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *retained = packages.clone();
        Ok(packages)
    }

    /// Completes the flow with the index the user picked; `None` means the
    /// picker was cancelled.
    pub fn on_done(&self, picked: Option<usize>) -> Result<()> {
        let index = match picked {
            Some(index) => index,
            None => return Ok(()),
        };
        let package = {
            let retained = self
                .disabled_packages
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match retained.get(index) {
                Some(package) => package.clone(),
                None => return Ok(()),
            }
        };

        self.disabler
            .reenable_packages([package.clone()], Operation::Enable)?;
        self.status.status_message(&format!(
            "Package {} successfully removed from the list of disabled packages - \
             restarting the editor may be required",
            package
        ));
        Ok(())
    }
}
