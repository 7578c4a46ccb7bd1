use serde::{Deserialize, Serialize};

/// A minute interval with independently open or closed endpoints.
///
/// `None` endpoints are unbounded. Because minutes are integral, the algebra
/// normalizes both endpoints to a half-open `[lo, hi)` form before comparing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
	pub min: Option<u32>,
	pub max: Option<u32>,
	pub left_closed: bool,
	pub right_closed: bool,
}
impl Interval {
	pub fn closed(min: u32, max: u32) -> Self {
		Self { min: Some(min), max: Some(max), left_closed: true, right_closed: true }
	}

	pub fn left_closed_right_open(min: u32, max: u32) -> Self {
		Self { min: Some(min), max: Some(max), left_closed: true, right_closed: false }
	}

	pub fn at_least(min: u32) -> Self {
		Self { min: Some(min), max: None, left_closed: true, right_closed: false }
	}

	pub fn more_than(min: u32) -> Self {
		Self { min: Some(min), max: None, left_closed: false, right_closed: false }
	}

	pub fn less_than(max: u32) -> Self {
		Self { min: None, max: Some(max), left_closed: true, right_closed: false }
	}

	/// Effective inclusive lower bound.
	fn lower_inclusive(&self) -> Option<u32> {
		self.min.map(|value| if self.left_closed { value } else { value.saturating_add(1) })
	}

	/// Effective exclusive upper bound.
	fn upper_exclusive(&self) -> Option<u32> {
		self.max.map(|value| if self.right_closed { value.saturating_add(1) } else { value })
	}

	pub fn is_empty(&self) -> bool {
		match (self.lower_inclusive(), self.upper_exclusive()) {
			(Some(lo), Some(hi)) => lo >= hi,
			_ => false,
		}
	}

	/// Whether `other` is fully contained in `self`.
	pub fn contains_interval(&self, other: &Self) -> bool {
		let lower_ok = match (self.lower_inclusive(), other.lower_inclusive()) {
			(None, _) => true,
			(Some(_), None) => false,
			(Some(own), Some(theirs)) => own <= theirs,
		};
		let upper_ok = match (self.upper_exclusive(), other.upper_exclusive()) {
			(None, _) => true,
			(Some(_), None) => false,
			(Some(own), Some(theirs)) => theirs <= own,
		};

		lower_ok && upper_ok
	}

	pub fn overlaps(&self, other: &Self) -> bool {
		if self.is_empty() || other.is_empty() {
			return false;
		}

		let lower_ok = match (self.lower_inclusive(), other.upper_exclusive()) {
			(Some(lo), Some(hi)) => lo < hi,
			_ => true,
		};
		let upper_ok = match (other.lower_inclusive(), self.upper_exclusive()) {
			(Some(lo), Some(hi)) => lo < hi,
			_ => true,
		};

		lower_ok && upper_ok
	}

	/// Midpoint used for duration-bucket matching; falls back to the bounded
	/// endpoint when the interval is half-open.
	pub fn midpoint(&self) -> Option<u32> {
		match (self.lower_inclusive(), self.upper_exclusive()) {
			(Some(lo), Some(hi)) if lo < hi => Some(lo + (hi - 1 - lo) / 2),
			(Some(lo), None) => Some(lo),
			(None, Some(hi)) => Some(hi.saturating_sub(1)),
			_ => None,
		}
	}

	pub fn describe(&self) -> String {
		match (self.min, self.max) {
			(Some(min), Some(max)) if min == max && self.left_closed && self.right_closed => {
				format!("{min} minutes")
			},
			(Some(min), Some(max)) => {
				let left = if self.left_closed { '[' } else { '(' };
				let right = if self.right_closed { ']' } else { ')' };

				format!("{left}{min}, {max}{right} minutes")
			},
			(Some(min), None) =>
				if self.left_closed {
					format!("at least {min} minutes")
				} else {
					format!("more than {min} minutes")
				},
			(None, Some(max)) =>
				if self.right_closed {
					format!("at most {max} minutes")
				} else {
					format!("less than {max} minutes")
				},
			(None, None) => "any duration".to_string(),
		}
	}
}
