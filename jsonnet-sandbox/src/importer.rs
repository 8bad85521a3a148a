use jrsonnet_evaluator::error::{Error as JsonnetError, LocError, Result as JsonnetResult};
use jrsonnet_evaluator::ImportResolver;
use jrsonnet_interner::IStr;
use std::any::Any;
use std::path::Path;
use std::rc::Rc;

/// Import resolver that refuses every file access.
///
/// Installed in every sandboxed interpreter so `import`, `importstr` and
/// friends cannot read from the filesystem. Data the snippet needs must be
/// passed in through bindings.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorImporter;

pub(crate) fn import_not_available(path: &Path) -> String {
    format!("import not available {}", path.display())
}

impl ImportResolver for ErrorImporter {
    fn resolve_file(&self, _from: &Path, path: &Path) -> JsonnetResult<Rc<Path>> {
        Err(LocError::new(JsonnetError::RuntimeError(
            import_not_available(path).into(),
        )))
    }

    fn load_file_contents(&self, resolved: &Path) -> JsonnetResult<IStr> {
        Err(LocError::new(JsonnetError::RuntimeError(
            import_not_available(resolved).into(),
        )))
    }

    unsafe fn as_any(&self) -> &dyn Any {
        self
    }
}
