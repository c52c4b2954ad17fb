use std::{cmp::Ordering, fmt};

use anyhow::{anyhow, bail, Result};
use nix::sys::utsname::uname;
use regex::Regex;

/// Kernel release, eg. 6.2.14-300.fc38.x86_64.
#[derive(Clone, Debug)]
pub struct KernelVersion {
    major: u32,
    minor: u32,
    patch: u32,
    /// Distribution build number, eg. 300 above, if any.
    build: Option<u32>,
    /// Full release string, as `uname -r` reports it.
    pub full: String,
}

impl KernelVersion {
    /// Version of the running kernel.
    pub fn current() -> Result<Self> {
        let uts = uname().map_err(|e| anyhow!("Could not get the kernel release: {e}"))?;
        Self::parse(
            uts.release()
                .to_str()
                .ok_or_else(|| anyhow!("Kernel release is not valid UTF-8"))?,
        )
    }

    /// Parse a `uname -r` like release string.
    pub fn parse(release: &str) -> Result<Self> {
        let re = Regex::new(r"^(\d+)\.(\d+)\.(\d+)\+?(?:[-.](.*))?$")?;
        let caps = re
            .captures(release)
            .ok_or_else(|| anyhow!("Invalid kernel release {release}"))?;
        let num = |i: usize| -> Result<u32> { Ok(caps[i].parse()?) };

        // The build number is the first numeric part of the suffix, eg.
        // 6.2.0-20-generic or 6.4.12-arch1-1.
        let build = caps
            .get(4)
            .and_then(|rest| rest.as_str().split(['-', '.']).find_map(|s| s.parse().ok()));

        Ok(KernelVersion {
            major: num(1)?,
            minor: num(2)?,
            patch: num(3)?,
            build,
            full: release.to_string(),
        })
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full)
    }
}

/// Requirement on the kernel version, made of one or two comparisons
/// separated by a comma, eg. ">= 5.10" or "> 6, <= 6.3".
#[derive(Debug)]
pub(crate) struct KernelVersionReq(Vec<Comparison>);

impl KernelVersionReq {
    pub(crate) fn parse(req: &str) -> Result<Self> {
        let cmps = req
            .split(',')
            .map(|c| Comparison::parse(c.trim()))
            .collect::<Result<Vec<_>>>()?;
        if cmps.len() > 2 {
            bail!("Too many comparisons in kernel version requirement {req}");
        }
        Ok(KernelVersionReq(cmps))
    }

    pub(crate) fn matches(&self, version: &KernelVersion) -> bool {
        self.0.iter().all(|cmp| cmp.matches(version))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

/// Single comparison. Only the given version parts are compared: "= 6.2"
/// matches every 6.2.x kernel.
#[derive(Debug)]
struct Comparison {
    op: Operator,
    /// major, then optionally minor and patch.
    version: Vec<u32>,
    build: Option<u32>,
}

impl Comparison {
    fn parse(cmp: &str) -> Result<Self> {
        let re = Regex::new(r"^(>=|<=|!=|=|>|<)\s*(\d+(?:\.\d+){0,2})(?:-(\d+))?$")?;
        let caps = re
            .captures(cmp)
            .ok_or_else(|| anyhow!("Invalid kernel version comparison {cmp}"))?;

        let op = match &caps[1] {
            "=" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            "<" => Operator::Lt,
            ">=" => Operator::Ge,
            "<=" => Operator::Le,
            op => bail!("Invalid operator {op}"),
        };
        let version = caps[2]
            .split('.')
            .map(|n| n.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()?;
        let build = caps.get(3).map(|b| b.as_str().parse()).transpose()?;

        Ok(Comparison { op, version, build })
    }

    fn order(&self, version: &KernelVersion) -> Ordering {
        let parts = [version.major, version.minor, version.patch];
        for (have, want) in parts.iter().zip(self.version.iter()) {
            match have.cmp(want) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }

        // The build only matters when the full version was given.
        if self.version.len() < parts.len() {
            return Ordering::Equal;
        }
        match (version.build, self.build) {
            (Some(have), Some(want)) => have.cmp(&want),
            (None, Some(_)) => Ordering::Greater,
            _ => Ordering::Equal,
        }
    }

    fn matches(&self, version: &KernelVersion) -> bool {
        let ord = self.order(version);
        match self.op {
            Operator::Eq => ord.is_eq(),
            Operator::Ne => ord.is_ne(),
            Operator::Gt => ord.is_gt(),
            Operator::Lt => ord.is_lt(),
            Operator::Ge => ord.is_ge(),
            Operator::Le => ord.is_le(),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("6.2.14-300.fc38.x86_64", (6, 2, 14), Some(300) ; "fedora")]
    #[test_case("6.2.0-20-generic", (6, 2, 0), Some(20) ; "ubuntu")]
    #[test_case("6.2.14.fc38.x86_64", (6, 2, 14), None ; "no build")]
    #[test_case("6.4.12-arch1-1", (6, 4, 12), Some(1) ; "arch")]
    #[test_case("5.10.0+", (5, 10, 0), None ; "dirty")]
    #[test_case("6.8.0", (6, 8, 0), None ; "plain")]
    fn parse(release: &str, version: (u32, u32, u32), build: Option<u32>) {
        let v = KernelVersion::parse(release).unwrap();
        assert_eq!((v.major, v.minor, v.patch), version);
        assert_eq!(v.build, build);
        assert_eq!(v.full, release);
        assert_eq!(v.to_string(), release);
    }

    #[test]
    fn parse_invalid() {
        assert!(KernelVersion::parse("6.2").is_err());
        assert!(KernelVersion::parse("six.two.one").is_err());
        assert!(KernelVersion::parse("").is_err());
    }

    #[test]
    fn current() {
        assert!(KernelVersion::current().is_ok());
    }

    #[test_case("= 6.2.14-300", true ; "eq full")]
    #[test_case("= 6.2.14", true ; "eq patch")]
    #[test_case("= 6.2.15", false ; "eq other patch")]
    #[test_case("= 6.2", true ; "eq minor")]
    #[test_case("= 7", false ; "eq other major")]
    #[test_case("!= 6.2.14-301", true ; "ne build")]
    #[test_case("!= 6.2.14", false ; "ne patch")]
    #[test_case("> 6.2.14-200", true ; "gt build")]
    #[test_case("> 6.2", false ; "gt same minor")]
    #[test_case(">= 6.2.14-300", true ; "ge same")]
    #[test_case(">= 5.19", true ; "ge older")]
    #[test_case(">=6.3", false ; "ge newer no space")]
    #[test_case("< 6.3", true ; "lt newer")]
    #[test_case("<= 6.2", true ; "le same minor")]
    #[test_case("> 6, <= 6.3", false ; "range major")]
    #[test_case(">= 6, <= 6.3", true ; "range")]
    fn matches(req: &str, expected: bool) {
        let version = KernelVersion::parse("6.2.14-300.fc38.x86_64").unwrap();
        assert_eq!(KernelVersionReq::parse(req).unwrap().matches(&version), expected);
    }

    #[test]
    fn build_missing() {
        let version = KernelVersion::parse("6.2.14").unwrap();
        assert!(KernelVersionReq::parse("> 6.2.14-300").unwrap().matches(&version));
    }

    #[test_case("6.2" ; "no operator")]
    #[test_case("~ 6.2" ; "unknown operator")]
    #[test_case(">= 6.2.1.4" ; "too many parts")]
    #[test_case(">= 5, < 6, != 5.4" ; "too many comparisons")]
    fn invalid_req(req: &str) {
        assert!(KernelVersionReq::parse(req).is_err());
    }
}
