//! Decisions taken from the build history.

use stagerun_core::environment::BuildContext;
use stagerun_core::history::{BuildRecord, BuildState};
use stagerun_core::job::BuildOutcome;

/// Number of a newer build for the same pull request, if one exists.
///
/// Only pull-request builds can be superseded. Cancelled builds never
/// supersede, everything else newer than the current build does.
pub fn find_newer_build(records: &[BuildRecord], context: &BuildContext) -> Option<u64> {
    let pull_request = context.pull_request?;
    let current = context.build_number?;

    records
        .iter()
        .filter(|r| r.pull_request == Some(pull_request))
        .filter(|r| r.state != BuildState::Cancelled)
        .map(|r| r.build_number)
        .filter(|n| *n > current)
        .max()
}

/// Outcome of the latest finished build before this one on the same line of work.
///
/// For pull-request builds that is the same pull request; otherwise
/// non-pull-request builds of the same branch.
pub fn previous_outcome(records: &[BuildRecord], context: &BuildContext) -> Option<BuildOutcome> {
    records
        .iter()
        .filter(|r| match context.build_number {
            Some(current) => r.build_number < current,
            None => true,
        })
        .filter(|r| match context.pull_request {
            Some(pr) => r.pull_request == Some(pr),
            None => {
                r.pull_request.is_none()
                    && (context.branch.is_none() || r.branch == context.branch)
            }
        })
        .filter(|r| r.state.is_finished())
        .max_by_key(|r| r.build_number)
        .and_then(|r| r.state.outcome())
}
