//! Background compute unit
//!
//! Parsing and voxelization run on a dedicated worker thread that is only
//! reachable through [`TaskChannel`]. Requests and responses cross the thread
//! boundary as owned envelopes; nothing is shared.

pub mod geometry;
pub mod options;

pub use geometry::{prepare_for_voxelization, GeometryBounds, PointGeometry};
pub use options::{GenerateOptions, VoxelizerOptions};

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::{
    Operation, RequestEnvelope, ResponseBody, ResponseEnvelope, ResultFields, TaskChannel,
};

/// The transform hosted by the compute unit
///
/// Implementations report failures as plain messages; they travel back in
/// the response's `error` field.
pub trait ComputeBackend: Send + 'static {
    /// Decode a point-cloud file into vertex buffers
    fn parse(&mut self, buffer: Vec<u8>) -> Result<PointGeometry, String>;

    /// Voxelize prepared geometry and pack it into a world package
    fn voxelize(&mut self, geometry: &PointGeometry, options: &GenerateOptions) -> Result<Vec<u8>, String>;
}

/// A running compute unit and the channel that reaches it
pub struct ComputeUnit {
    channel: TaskChannel,
    worker: Option<JoinHandle<()>>,
    router: Option<JoinHandle<()>>,
}

impl ComputeUnit {
    /// Start the worker and response router threads
    pub fn spawn<B: ComputeBackend>(backend: B, request_timeout: Option<Duration>) -> std::io::Result<Self> {
        let (request_tx, request_rx) = flume::unbounded::<RequestEnvelope>();
        let (response_tx, response_rx) = flume::unbounded::<ResponseEnvelope>();
        let channel = TaskChannel::new(request_tx, request_timeout);

        let worker = thread::Builder::new()
            .name("compute-unit".to_string())
            .spawn(move || run_worker(backend, request_rx, response_tx))?;

        let router_channel = channel.clone();
        let router = thread::Builder::new()
            .name("compute-router".to_string())
            .spawn(move || {
                while let Ok(response) = response_rx.recv() {
                    router_channel.dispatch(response);
                }
                // Worker exited or panicked
                router_channel.shutdown();
            });
        let router = match router {
            Ok(router) => router,
            Err(e) => {
                channel.shutdown();
                let _ = worker.join();
                return Err(e);
            }
        };

        log::info!("Compute unit started");
        Ok(Self {
            channel,
            worker: Some(worker),
            router: Some(router),
        })
    }

    pub fn channel(&self) -> TaskChannel {
        self.channel.clone()
    }

    /// Stop the unit, rejecting any requests still in flight
    pub fn terminate(&mut self) {
        self.channel.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Compute unit worker panicked");
            }
        }
        if let Some(router) = self.router.take() {
            let _ = router.join();
            log::info!("Compute unit stopped");
        }
    }
}

impl Drop for ComputeUnit {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run_worker<B: ComputeBackend>(
    mut backend: B,
    requests: flume::Receiver<RequestEnvelope>,
    responses: flume::Sender<ResponseEnvelope>,
) {
    while let Ok(RequestEnvelope { operation, request_id }) = requests.recv() {
        let name = operation.name();
        let body = match handle_operation(&mut backend, operation) {
            Ok(fields) => ResponseBody::Completed(fields),
            Err(error) => {
                log::warn!("{} request {} failed: {}", name, request_id, error);
                ResponseBody::Failed { error }
            }
        };

        if responses.send(ResponseEnvelope { request_id, body }).is_err() {
            break;
        }
    }
}

fn handle_operation<B: ComputeBackend>(backend: &mut B, operation: Operation) -> Result<ResultFields, String> {
    match operation {
        Operation::Load { buffer } => {
            let geometry = backend.parse(buffer)?;
            geometry.validate()?;
            log::debug!("Parsed point cloud with {} points", geometry.point_count());
            Ok(ResultFields::Loaded(geometry))
        }
        Operation::Generate { mut geometry, options } => {
            geometry.validate()?;
            options.voxelizer.validate()?;
            prepare_for_voxelization(&mut geometry, &options.voxelizer);
            let buffer = backend.voxelize(&geometry, &options)?;
            Ok(ResultFields::Generated { buffer })
        }
    }
}
