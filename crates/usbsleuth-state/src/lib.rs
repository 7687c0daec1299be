/// UsbSleuth State — refresh/eject orchestration for front ends.
///
/// The managers here own the authoritative device snapshot and are driven
/// from the presentation thread. Blocking directory calls run on short-lived
/// worker threads; their results come back over a channel and are committed
/// when the front end calls `process_messages()` (once per frame or tick).
///
/// # Modules
///
/// - [`snapshot`] — The immutable [`MainAreaState`] published to observers.
/// - [`main_area`] — [`MainAreaStateManager`], the single logical writer.
/// - [`overview`] — [`OverviewStateManager`], adding selection and
///   outgoing UI requests on top of the main-area manager.
/// - `worker` — device aggregation and worker-thread plumbing.
pub mod main_area;
pub mod overview;
pub mod snapshot;
mod worker;

pub use main_area::{MainAreaStateManager, ManagerConfig};
pub use overview::{OverviewRequest, OverviewState, OverviewStateManager, SelectedDevice};
pub use snapshot::{MainAreaState, Operation, SnapshotCause};
