use std::fmt;
use std::str::FromStr;

/// The package-manager operation driving a disable or re-enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Install,
    Upgrade,
    Remove,
    /// A user-requested disable, meant to survive restarts.
    Disable,
    /// A user-requested enable.
    Enable,
    /// Legacy loader bookkeeping.
    #[deprecated(note = "loader packages are no longer special-cased")]
    Loader,
}

impl Operation {
    /// Whether appearance settings are backed up for a later restore, as
    /// opposed to reset with no intent to return.
    pub fn backs_up_appearance(self) -> bool {
        matches!(self, Operation::Install | Operation::Upgrade)
    }

    #[allow(deprecated)]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Upgrade => "upgrade",
            Operation::Remove => "remove",
            Operation::Disable => "disable",
            Operation::Enable => "enable",
            Operation::Loader => "loader",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = anyhow::Error;

    #[allow(deprecated)]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(Operation::Install),
            "upgrade" => Ok(Operation::Upgrade),
            "remove" => Ok(Operation::Remove),
            "disable" => Ok(Operation::Disable),
            "enable" => Ok(Operation::Enable),
            "loader" => Ok(Operation::Loader),
            other => Err(anyhow::anyhow!("不明な操作です: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_policy() {
        assert!(Operation::Install.backs_up_appearance());
        assert!(Operation::Upgrade.backs_up_appearance());
        assert!(!Operation::Remove.backs_up_appearance());
        assert!(!Operation::Disable.backs_up_appearance());
        assert!(!Operation::Enable.backs_up_appearance());
    }

    #[test]
    fn test_parse_and_display() {
        let operation: Operation = "upgrade".parse().unwrap();
        assert_eq!(operation, Operation::Upgrade);
        assert_eq!(operation.to_string(), "upgrade");

        assert!("uninstall".parse::<Operation>().is_err());
    }
}
