//! The `RecordStore` trait.
//!
//! Implemented by storage backends (e.g. `reop-store-sqlite`). The HTTP layer
//! depends on this abstraction, not on a concrete backend. Every operation on
//! operator-owned rows takes an explicit [`OperatorContext`].

use std::future::Future;

use crate::{
  Classify,
  access::OperatorContext,
  command::{
    Command, CommandStatus, Documentation, ExecutionLog, NewCommand,
    NewDocumentation, NewExecution,
  },
  harmonic::HarmonicTarget,
  target::{ProfilingSession, TargetProfile},
  telemetry::{BiochemicalMarker, CoherenceSample, HarmonicFrequencyLog},
  thresholds::Thresholds,
};

/// Abstraction over a REOP record store backend.
///
/// Write methods validate their input with the store's [`Thresholds`] before
/// persisting and reject invalid records without writing anything.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Classify + Send + Sync + 'static;

  /// The thresholds this store validates against.
  fn thresholds(&self) -> &Thresholds;

  // ── Target profiles ───────────────────────────────────────────────────

  /// Insert or replace a profile. Blank ids are synthesized; an update that
  /// would drop or alter existing `profiling_history` entries is rejected.
  fn save_target_profile<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    profile: TargetProfile,
  ) -> impl Future<Output = Result<TargetProfile, Self::Error>> + Send + 'a;

  /// Retrieve a profile by id. Returns `None` if not found or not visible to
  /// `ctx`.
  fn get_target_profile<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    profile_id: &'a str,
  ) -> impl Future<Output = Result<Option<TargetProfile>, Self::Error>> + Send + 'a;

  /// Append one session to a profile's history.
  fn append_profiling_session<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    profile_id: &'a str,
    session: ProfilingSession,
  ) -> impl Future<Output = Result<TargetProfile, Self::Error>> + Send + 'a;

  /// Visible profiles with `coherence_index >= min`, highest first.
  fn find_by_coherence_threshold<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    min: f64,
  ) -> impl Future<Output = Result<Vec<TargetProfile>, Self::Error>> + Send + 'a;

  /// Visible profiles with `operational_experience.success_rate >= min`,
  /// highest first.
  fn find_by_success_rate_threshold<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    min: f64,
  ) -> impl Future<Output = Result<Vec<TargetProfile>, Self::Error>> + Send + 'a;

  // ── Harmonic targets ──────────────────────────────────────────────────

  fn save_harmonic_target<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    target: HarmonicTarget,
  ) -> impl Future<Output = Result<HarmonicTarget, Self::Error>> + Send + 'a;

  /// Harmonic targets whose manifestation status is `active`, highest
  /// resonance first.
  fn find_active_manifestations(
    &self,
  ) -> impl Future<Output = Result<Vec<HarmonicTarget>, Self::Error>> + Send + '_;

  // ── Commands ──────────────────────────────────────────────────────────

  /// Create a command owned by the caller, in `pending` status.
  fn create_command<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    input: NewCommand,
  ) -> impl Future<Output = Result<Command, Self::Error>> + Send + 'a;

  /// Retrieve a command visible to the caller.
  fn get_command<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    command_id: &'a str,
  ) -> impl Future<Output = Result<Option<Command>, Self::Error>> + Send + 'a;

  /// Commands issued by `operator_id` that the caller may see, newest first.
  fn find_by_operator<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    operator_id: &'a str,
  ) -> impl Future<Output = Result<Vec<Command>, Self::Error>> + Send + 'a;

  /// Move a command to `to`. Fails if the transition is not allowed from the
  /// current status.
  fn transition_command<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    command_id: &'a str,
    to: CommandStatus,
  ) -> impl Future<Output = Result<Command, Self::Error>> + Send + 'a;

  // ── Execution logs and documentation ──────────────────────────────────

  fn record_execution<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    input: NewExecution,
  ) -> impl Future<Output = Result<ExecutionLog, Self::Error>> + Send + 'a;

  /// Execution attempts for a command, oldest first.
  fn executions_for<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    command_id: &'a str,
  ) -> impl Future<Output = Result<Vec<ExecutionLog>, Self::Error>> + Send + 'a;

  fn attach_documentation<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    input: NewDocumentation,
  ) -> impl Future<Output = Result<Documentation, Self::Error>> + Send + 'a;

  fn documentation_for<'a>(
    &'a self,
    ctx: &'a OperatorContext,
    command_id: &'a str,
  ) -> impl Future<Output = Result<Vec<Documentation>, Self::Error>> + Send + 'a;

  // ── Telemetry ─────────────────────────────────────────────────────────

  fn record_harmonic_frequency(
    &self,
    log: HarmonicFrequencyLog,
  ) -> impl Future<Output = Result<HarmonicFrequencyLog, Self::Error>> + Send + '_;

  fn record_coherence_sample(
    &self,
    sample: CoherenceSample,
  ) -> impl Future<Output = Result<CoherenceSample, Self::Error>> + Send + '_;

  fn record_biochemical_marker(
    &self,
    marker: BiochemicalMarker,
  ) -> impl Future<Output = Result<BiochemicalMarker, Self::Error>> + Send + '_;

  /// Coherence samples for a profile, oldest first.
  fn coherence_samples<'a>(
    &'a self,
    profile_id: &'a str,
  ) -> impl Future<Output = Result<Vec<CoherenceSample>, Self::Error>> + Send + 'a;
}
