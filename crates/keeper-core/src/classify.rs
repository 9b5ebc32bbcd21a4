//! Maps raw logs and transport errors to an `ErrorClass`.

use keeper_types::ErrorClass;

const ALREADY_SATISFIED: &[&str] = &["nothing to vest", "already vested", "epoch already advanced"];
const OUT_OF_GAS: &[&str] = &["out of gas"];
const INSUFFICIENT_FEE: &[&str] = &["insufficient fee"];
const TRANSIENT: &[&str] = &[
	"signature verification failed",
	"account sequence mismatch",
	"incorrect account sequence",
	"timed out",
	"timeout",
	"tx already exists in cache",
];

/// Case-insensitive substring classifier.
///
/// Classes are tried in precedence order: AlreadySatisfied, OutOfGas,
/// InsufficientFee, Transient. Anything unmatched is Fatal.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
	rules: Vec<(ErrorClass, Vec<String>)>,
}

impl Default for ErrorClassifier {
	fn default() -> Self {
		let rule = |class, patterns: &[&str]| {
			(class, patterns.iter().map(|p| p.to_string()).collect())
		};
		Self {
			rules: vec![
				rule(ErrorClass::AlreadySatisfied, ALREADY_SATISFIED),
				rule(ErrorClass::OutOfGas, OUT_OF_GAS),
				rule(ErrorClass::InsufficientFee, INSUFFICIENT_FEE),
				rule(ErrorClass::Transient, TRANSIENT),
			],
		}
	}
}

impl ErrorClassifier {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends patterns to `class`. Patterns for `Fatal` are ignored since it
	/// is the fallback.
	pub fn with_patterns<I, S>(mut self, class: ErrorClass, patterns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		if let Some((_, existing)) = self.rules.iter_mut().find(|(c, _)| *c == class) {
			existing.extend(
				patterns
					.into_iter()
					.map(|p| p.as_ref().trim().to_lowercase())
					.filter(|p| !p.is_empty()),
			);
		}
		self
	}

	/// Builds a classifier from the `[classifier]` configuration section.
	pub fn from_config(config: &keeper_config::ClassifierConfig) -> Self {
		Self::default()
			.with_patterns(ErrorClass::AlreadySatisfied, &config.already_satisfied)
			.with_patterns(ErrorClass::OutOfGas, &config.out_of_gas)
			.with_patterns(ErrorClass::InsufficientFee, &config.insufficient_fee)
			.with_patterns(ErrorClass::Transient, &config.transient)
	}

	pub fn classify(&self, message: &str) -> ErrorClass {
		let message = message.to_lowercase();
		self.rules
			.iter()
			.find(|(_, patterns)| patterns.iter().any(|p| message.contains(p.as_str())))
			.map(|(class, _)| *class)
			.unwrap_or(ErrorClass::Fatal)
	}
}
