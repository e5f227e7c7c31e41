pub mod backends {
    mod filesystem;
    mod register;

    pub use filesystem::{FileSystemContentStore, FileSystemVariantStore};
    pub use register::BackendConfigs;
}

mod template;

pub use backends::BackendConfigs;
pub use template::{ContentStore, OriginalImage, VariantStore};
