//! stageview: a multi-model 3D staging viewer.
//!
//! The [`viewer`] module is the host-facing API. [`scene`], [`assets`] and
//! [`render`] hold the scene graph, loading and drawing pieces it is built
//! from; [`app`] and [`ui`] are the desktop host.

pub mod app;
pub mod assets;
pub mod render;
pub mod scene;
pub mod ui;
pub mod viewer;

pub use assets::AssetError;
pub use render::{Renderer, TransformMode};
pub use scene::registry::ModelSummary;
pub use viewer::{
    create_viewer, ModelSource, PendingLoad, Subscription, Viewer, ViewerError, ViewerEvent,
    ViewerOptions,
};
