//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Each pluggable backend provides a `Registry` struct that names itself as it
/// appears in configuration and hands out its factory function.
pub trait ImplementationRegistry {
	/// The name used in configuration files, e.g. "memory" for
	/// `storage.implementations.memory`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	fn factory() -> Self::Factory;
}
