//! Storage namespaces used by the keeper.

use std::str::FromStr;

/// Storage namespaces for the records the keeper persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Resource records with their creation metadata.
	Resources,
	/// Last counter observed per resource.
	Counters,
	/// Per-resource outcome of a run.
	Runs,
	/// Full job reports.
	Reports,
}

impl StorageKey {
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Resources => "resources",
			StorageKey::Counters => "counters",
			StorageKey::Runs => "runs",
			StorageKey::Reports => "reports",
		}
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Resources, Self::Counters, Self::Runs, Self::Reports].into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"resources" => Ok(Self::Resources),
			"counters" => Ok(Self::Counters),
			"runs" => Ok(Self::Runs),
			"reports" => Ok(Self::Reports),
			_ => Err(()),
		}
	}
}
