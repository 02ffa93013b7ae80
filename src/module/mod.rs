//! Module layers: descriptors, the readability graph, resolution, class
//! loading with package encapsulation, and the bootstrapper that ties them
//! together.

pub mod bootstrap;
pub mod descriptor;
pub mod graph;
pub mod layer;
pub mod loader;

pub use bootstrap::{find_main, launch_entry_point, BootstrapState, MainTarget, ModuleLayerBootstrapper};
pub use descriptor::{Archive, ModuleDescriptor, DESCRIPTOR_FILE};
pub use graph::ModuleGraph;
pub use layer::{Configuration, Controller, Module, ModuleLayer, ResolvedModule};
pub use loader::{LoadedClass, ModuleClassLoader};
