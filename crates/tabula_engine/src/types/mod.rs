// Re-export shared types from tabula_core to keep stable paths inside the engine
pub use tabula_core::{
    DocId,
    Document,
    DocumentStream,
    EngineError,
    EngineTransaction,
    FieldBuffer,
    StorageEngine,
    Value,
};
