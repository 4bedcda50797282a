pub const DEFAULT_DATABASE: &str = "(default)";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatabaseId {
    project_id: String,
    database: String,
}

impl DatabaseId {
    pub fn new(project_id: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: database.into(),
        }
    }

    /// Builds an id for the project's `(default)` database.
    pub fn default_database(project_id: impl Into<String>) -> Self {
        Self::new(project_id, DEFAULT_DATABASE)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self::new(self.project_id.clone(), database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_database_name() {
        let id = DatabaseId::default_database("project");
        assert_eq!(id.project_id(), "project");
        assert_eq!(id.database(), DEFAULT_DATABASE);
    }

    #[test]
    fn with_database_overrides() {
        let id = DatabaseId::default_database("project").with_database("custom");
        assert_eq!(id.database(), "custom");
    }
}
