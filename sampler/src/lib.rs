use gpuview_shared::HostSnapshot;
use std::future::Future;

mod nvidia_smi;

pub use nvidia_smi::NvidiaSmiSampler;

/// Reads the GPU state of the machine this process runs on.
///
/// Implementations never fail out of band: a read error is reported through
/// [`HostSnapshot::error`] and the caller decides what that means.
pub trait LocalSampler: Send + Sync + 'static {
    fn sample(&self) -> impl Future<Output = HostSnapshot> + Send;
}

pub fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}
