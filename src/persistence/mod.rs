pub mod document;
pub mod files;

pub use document::{load_document, normalize_tasks, save_document, Metadata, Rgba};
pub use files::{
    atomic_write, ensure_data_dir, gratitude_file, init_local_data_dir, read_file,
    resolve_data_dir, tasks_file,
};
