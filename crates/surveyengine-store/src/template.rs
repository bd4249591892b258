use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use surveyengine_core::domain::{BranchTarget, Step, StepType, Template, VariableBindings};
use surveyengine_core::error::{Result, SurveyError};
use surveyengine_core::resolver::{validate_template, TemplateLoader};

/// Reads templates from a single JSON array file, the format the source's
/// static fixtures used before the template editor grew a database backend.
/// Read-only: there is no write path, matching its original use as seed data.
pub struct FileTemplateLoader {
    templates: Vec<Template>,
}

impl FileTemplateLoader {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let templates: Vec<Template> = serde_json::from_str(&contents)?;
        for t in &templates {
            validate_template(t)?;
        }
        Ok(Self { templates })
    }

    pub fn list(&self) -> &[Template] {
        &self.templates
    }
}

impl TemplateLoader for FileTemplateLoader {
    fn get(&self, template_id: &str) -> Result<Template> {
        self.templates
            .iter()
            .find(|t| t.id == template_id)
            .cloned()
            .ok_or_else(|| SurveyError::TemplateNotFound(template_id.to_string()))
    }
}

/// Editable templates backed by SQLite, with soft-deleted steps and
/// variables recreated wholesale on every save, mirroring the editor's
/// "clear then rewrite" update strategy.
pub struct TemplateStore {
    db: Mutex<Connection>,
}

impl TemplateStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS templates (
                id                   TEXT PRIMARY KEY,
                theme                TEXT NOT NULL,
                system_prompt        TEXT NOT NULL,
                background_knowledge TEXT NOT NULL DEFAULT '',
                max_turns            INTEGER NOT NULL,
                welcome_message      TEXT NOT NULL,
                end_message          TEXT NOT NULL,
                host_id              TEXT,
                is_deleted           INTEGER NOT NULL DEFAULT 0,
                created_at           TEXT NOT NULL,
                updated_at           TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS template_steps (
                template_id   TEXT NOT NULL,
                step_order    INTEGER NOT NULL,
                content       TEXT NOT NULL,
                step_type     TEXT NOT NULL,
                condition     TEXT,
                branch_yes    TEXT,
                branch_no     TEXT,
                is_deleted    INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS template_variables (
                template_id      TEXT NOT NULL,
                variable_key     TEXT NOT NULL,
                variable_value   TEXT NOT NULL,
                is_deleted       INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_steps_template ON template_steps(template_id, is_deleted);
            CREATE INDEX IF NOT EXISTS idx_vars_template ON template_variables(template_id, is_deleted);",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn list(&self) -> Result<Vec<Template>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id FROM templates WHERE is_deleted = 0 ORDER BY created_at DESC",
        )?;
        let ids: Vec<String> = stmt.query_map([], |row| row.get(0))?.filter_map(|r| r.ok()).collect();
        drop(stmt);
        drop(db);
        ids.iter().map(|id| self.get_raw(id)).collect()
    }

    /// Validate, then insert a brand new template with a generated id.
    pub fn create(&self, mut template: Template) -> Result<Template> {
        template.id = uuid::Uuid::new_v4().to_string();
        self.validate_fields(&template)?;
        validate_template(&template)?;
        self.write(&template, true)?;
        Ok(template)
    }

    /// Validate, then overwrite an existing template's row plus its full
    /// step/variable sets (old rows are soft-deleted, not updated in place).
    pub fn update(&self, template: Template) -> Result<Template> {
        self.get_raw(&template.id)?;
        self.validate_fields(&template)?;
        validate_template(&template)?;
        self.write(&template, false)?;
        Ok(template)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE templates SET is_deleted = 1, updated_at = ?1 WHERE id = ?2 AND is_deleted = 0",
            params![now, id],
        )?;
        if changed == 0 {
            return Err(SurveyError::TemplateNotFound(id.to_string()));
        }
        Ok(())
    }

    fn validate_fields(&self, template: &Template) -> Result<()> {
        if template.theme.trim().is_empty() {
            return Err(SurveyError::Validation("theme must not be empty".into()));
        }
        if template.system_prompt.trim().is_empty() {
            return Err(SurveyError::Validation("system_prompt must not be empty".into()));
        }
        if template.welcome_message.trim().is_empty() {
            return Err(SurveyError::Validation("welcome_message must not be empty".into()));
        }
        if template.end_message.trim().is_empty() {
            return Err(SurveyError::Validation("end_message must not be empty".into()));
        }
        for step in &template.steps {
            if step.content.trim().is_empty() {
                return Err(SurveyError::Validation(format!("step {} content must not be empty", step.index)));
            }
        }
        Ok(())
    }

    fn write(&self, template: &Template, is_new: bool) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        if is_new {
            tx.execute(
                "INSERT INTO templates (id, theme, system_prompt, background_knowledge,
                    max_turns, welcome_message, end_message, host_id, is_deleted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
                params![
                    template.id, template.theme, template.system_prompt, template.background_knowledge,
                    template.max_turns, template.welcome_message, template.end_message, template.host_id, now,
                ],
            )?;
        } else {
            tx.execute(
                "UPDATE templates SET theme = ?1, system_prompt = ?2, background_knowledge = ?3,
                    max_turns = ?4, welcome_message = ?5, end_message = ?6, host_id = ?7, updated_at = ?8
                 WHERE id = ?9 AND is_deleted = 0",
                params![
                    template.theme, template.system_prompt, template.background_knowledge,
                    template.max_turns, template.welcome_message, template.end_message, template.host_id, now,
                    template.id,
                ],
            )?;
            tx.execute(
                "UPDATE template_steps SET is_deleted = 1 WHERE template_id = ?1 AND is_deleted = 0",
                params![template.id],
            )?;
            tx.execute(
                "UPDATE template_variables SET is_deleted = 1 WHERE template_id = ?1 AND is_deleted = 0",
                params![template.id],
            )?;
        }

        for step in &template.steps {
            let (step_type_text, condition, branch_yes, branch_no) = match &step.step_type {
                StepType::Linear => ("LINEAR", None, None, None),
                StepType::Condition { condition, branches } => (
                    "CONDITION",
                    Some(condition.clone()),
                    Some(String::from(branches[0])),
                    Some(String::from(branches[1])),
                ),
            };
            tx.execute(
                "INSERT INTO template_steps (template_id, step_order, content, step_type, condition, branch_yes, branch_no, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
                params![template.id, step.index as i64, step.content, step_type_text, condition, branch_yes, branch_no],
            )?;
        }

        for (key, value) in &template.variables.0 {
            tx.execute(
                "INSERT INTO template_variables (template_id, variable_key, variable_value, is_deleted)
                 VALUES (?1, ?2, ?3, 0)",
                params![template.id, key, value],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn get_raw(&self, id: &str) -> Result<Template> {
        let db = self.db.lock().unwrap();
        let row: Option<(String, String, String, String, u32, String, String, Option<String>)> = db
            .query_row(
                "SELECT id, theme, system_prompt, background_knowledge, max_turns,
                        welcome_message, end_message, host_id
                 FROM templates WHERE id = ?1 AND is_deleted = 0",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?,
                        row.get::<_, i64>(4)? as u32, row.get(5)?, row.get(6)?, row.get(7)?,
                    ))
                },
            )
            .optional()?;
        let (id, theme, system_prompt, background_knowledge, max_turns, welcome_message, end_message, host_id) =
            row.ok_or_else(|| SurveyError::TemplateNotFound(id.to_string()))?;

        let mut steps_stmt = db.prepare(
            "SELECT step_order, content, step_type, condition, branch_yes, branch_no
             FROM template_steps WHERE template_id = ?1 AND is_deleted = 0 ORDER BY step_order",
        )?;
        let steps: Vec<Step> = steps_stmt
            .query_map(params![id], row_to_step)?
            .filter_map(|r| r.ok())
            .collect();

        let mut vars_stmt = db.prepare(
            "SELECT variable_key, variable_value FROM template_variables
             WHERE template_id = ?1 AND is_deleted = 0",
        )?;
        let variables: std::collections::HashMap<String, String> = vars_stmt
            .query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(Template {
            id,
            theme,
            system_prompt,
            background_knowledge,
            max_turns,
            welcome_message,
            end_message,
            steps,
            variables: VariableBindings(variables),
            host_id,
        })
    }
}

impl TemplateLoader for TemplateStore {
    fn get(&self, template_id: &str) -> Result<Template> {
        self.get_raw(template_id)
    }
}

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<Step> {
    let index: i64 = row.get(0)?;
    let content: String = row.get(1)?;
    let step_type_text: String = row.get(2)?;
    let step_type = if step_type_text == "CONDITION" {
        let condition: String = row.get(3).unwrap_or_default();
        let branch_yes: String = row.get(4).unwrap_or_default();
        let branch_no: String = row.get(5).unwrap_or_default();
        let branches = [
            BranchTarget::try_from(branch_yes).unwrap_or(BranchTarget::End),
            BranchTarget::try_from(branch_no).unwrap_or(BranchTarget::End),
        ];
        StepType::Condition { condition, branches }
    } else {
        StepType::Linear
    };
    Ok(Step { index: index as usize, content, step_type })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn linear_template(id: &str) -> Template {
        Template {
            id: id.to_string(),
            theme: "Theme".into(),
            system_prompt: "Be helpful".into(),
            background_knowledge: String::new(),
            max_turns: 3,
            welcome_message: "Welcome".into(),
            end_message: "Thanks".into(),
            steps: vec![Step { index: 0, content: "Ask about X".into(), step_type: StepType::Linear }],
            variables: VariableBindings(HashMap::new()),
            host_id: None,
        }
    }

    #[test]
    fn create_assigns_an_id_and_round_trips_through_get() {
        let store = TemplateStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let created = store.create(linear_template("ignored")).unwrap();
        let fetched = store.get(&created.id).unwrap();
        assert_eq!(fetched.steps.len(), 1);
        assert_eq!(fetched.theme, "Theme");
    }

    #[test]
    fn update_replaces_steps_wholesale() {
        let store = TemplateStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let created = store.create(linear_template("ignored")).unwrap();

        let mut updated = created.clone();
        updated.steps = vec![
            Step { index: 0, content: "New step A".into(), step_type: StepType::Linear },
            Step { index: 1, content: "New step B".into(), step_type: StepType::Linear },
        ];
        store.update(updated).unwrap();

        let fetched = store.get(&created.id).unwrap();
        assert_eq!(fetched.steps.len(), 2);
        assert_eq!(fetched.steps[1].content, "New step B");
    }

    #[test]
    fn create_rejects_blank_theme() {
        let store = TemplateStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let mut t = linear_template("ignored");
        t.theme = "  ".into();
        assert!(store.create(t).is_err());
    }

    #[test]
    fn delete_is_soft_and_excludes_from_get_and_list() {
        let store = TemplateStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let created = store.create(linear_template("ignored")).unwrap();
        store.delete(&created.id).unwrap();
        assert!(store.get(&created.id).is_err());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn file_loader_reads_json_array_and_validates_each_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("templates.json");
        let templates = vec![linear_template("seed-1")];
        fs::write(&path, serde_json::to_string(&templates).unwrap()).unwrap();

        let loader = FileTemplateLoader::load(&path).unwrap();
        assert_eq!(loader.list().len(), 1);
        assert_eq!(loader.get("seed-1").unwrap().theme, "Theme");
        assert!(loader.get("missing").is_err());
    }
}
