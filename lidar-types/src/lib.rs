//! Shared entities and external-collaborator contracts for the LiDAR
//! perception pipeline: the types that cross module boundaries (`PolarPoint`,
//! `CartesianPoint`, `Frame`, `WorldCluster`, `Track`) and the traits that
//! describe collaborators the core consumes but does not implement
//! (`Tracker`, `Classifier`, `PersistenceSink`, `PublishSink`, the snapshot
//! stores).

pub mod cluster;
pub mod error;
pub mod frame;
pub mod point;
pub mod track;
pub mod traits;

pub use cluster::WorldCluster;
pub use error::ConfigError;
pub use frame::Frame;
pub use point::{CartesianPoint, PolarPoint};
pub use track::{BoundingBox, FrameBundle, Track, TrackClassification, TrackFeatures, TrackObservation};
pub use traits::{BgStore, Classifier, PersistenceSink, PublishSink, RegionStore, Tracker, VisualiserAdapter};
