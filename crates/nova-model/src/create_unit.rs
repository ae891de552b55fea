use crate::error::{ModelError, Result};
use crate::handle::{ElementHandle, ElementKind};
use crate::open::is_openable_name;
use crate::operation::{ModelOperation, OperationContext};

/// Writes a new `.java` file into a source package, creating missing package folders.
#[derive(Debug)]
pub struct CreateCompilationUnitOperation {
    package: ElementHandle,
    name: String,
    contents: Vec<u8>,
    created: Option<ElementHandle>,
}

impl CreateCompilationUnitOperation {
    pub fn new(package: ElementHandle, name: &str, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            package,
            name: name.to_string(),
            contents: contents.into(),
            created: None,
        }
    }

    pub fn created(&self) -> Option<&ElementHandle> {
        self.created.as_ref()
    }
}

impl ModelOperation for CreateCompilationUnitOperation {
    fn name(&self) -> &str {
        "create-compilation-unit"
    }

    fn execute(&mut self, cx: &mut OperationContext<'_>) -> Result<()> {
        if self.package.kind() != ElementKind::Package || self.package.is_in_archive() {
            return Err(ModelError::operation(
                self.name(),
                format!("{} is not a source package", self.package),
            ));
        }
        if !is_openable_name(&self.name, "java") {
            return Err(ModelError::operation(
                self.name(),
                format!("`{}` is not a valid compilation unit name", self.name),
            ));
        }
        let folder = self
            .package
            .resource_path()
            .ok_or_else(|| ModelError::NotPresent(self.package.clone()))?;
        cx.check_cancelled()?;

        let workspace = cx.workspace();
        workspace.create_folders(&folder)?;
        workspace.create_file(&folder.join(&self.name), self.contents.clone())?;
        cx.set_modified_resources();

        let unit = self.package.compilation_unit(&self.name);
        cx.delta_mut().added(&unit);
        self.created = Some(unit);
        Ok(())
    }
}
