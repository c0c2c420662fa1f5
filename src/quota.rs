//! How many files of a selection may be converted.
//!
//! The identity provider is reduced to one capability flag. Counting and
//! persisting daily usage belongs to the caller.

pub const MAX_DAILY_FREE: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
	/// Signed in: no limit.
	Unlimited,
	/// Anonymous, with the number of conversions already used today.
	Limited { used_today: u32 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
	/// Files to take from the front of the selection.
	pub accepted: usize,
	/// The selection was cut short by the limit.
	pub truncated: bool,
	/// Nothing can be accepted until the limit resets.
	pub limit_reached: bool
}

pub fn admit(capability: Capability, requested: usize) -> Admission {
	match capability {
		Capability::Unlimited => Admission {
			accepted: requested,
			truncated: false,
			limit_reached: false
		},
		Capability::Limited { used_today } => {
			let remaining = MAX_DAILY_FREE.saturating_sub(used_today) as usize;
			if remaining == 0 {
				return Admission {
					accepted: 0,
					truncated: requested > 0,
					limit_reached: true
				};
			}
			Admission {
				accepted: requested.min(remaining),
				truncated: requested > remaining,
				limit_reached: false
			}
		}
	}
}

/// Keep the admitted front of `selection`, dropping the rest.
pub fn admit_selection<T>(capability: Capability, mut selection: Vec<T>) -> (Vec<T>, Admission) {
	let admission = admit(capability, selection.len());
	selection.truncate(admission.accepted);
	(selection, admission)
}
