//! Checklist template procedures.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Deleted, IdInput, Output, Workspace, clean, required};
use crate::models::{ChecklistStage, ChecklistTemplate, ChecklistTemplateItem};
use crate::permissions::{Caller, Capability};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplate {
    pub name: String,
    pub stage: ChecklistStage,
    pub description: Option<String>,
    /// Item titles, in order
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddTemplateItem {
    pub template_id: i64,
    pub title: String,
    pub description: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTemplates {
    pub stage: Option<ChecklistStage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateList {
    pub templates: Vec<ChecklistTemplate>,
    pub count: usize,
}

pub fn template_create(
    ws: &mut Workspace,
    caller: &Caller,
    input: CreateTemplate,
) -> Result<ChecklistTemplate> {
    caller.require(Capability::ManageTemplates)?;
    let name = required(&input.name, "Template name")?;
    let titles: Vec<String> = input
        .items
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if titles.is_empty() {
        return Err(Error::BadRequest(
            "A checklist template needs at least one item".to_string(),
        ));
    }

    let items = titles
        .into_iter()
        .enumerate()
        .map(|(i, title)| ChecklistTemplateItem {
            id: 0,
            template_id: 0,
            position: i as u32 + 1,
            title,
            description: None,
            required: true,
        })
        .collect();
    let template = ws.storage.insert_template(&ChecklistTemplate {
        id: 0,
        name,
        stage: input.stage,
        description: clean(input.description),
        created_by: caller.user_id,
        created_at: Utc::now(),
        items,
    })?;

    ws.audit(
        caller,
        "template.create",
        "template",
        Some(template.id),
        &json!({"name": template.name, "stage": template.stage, "items": template.items.len()}),
    );
    Ok(template)
}

/// Append an item. Refused once the template has checklist instances.
pub fn template_add_item(
    ws: &mut Workspace,
    caller: &Caller,
    input: AddTemplateItem,
) -> Result<ChecklistTemplate> {
    caller.require(Capability::ManageTemplates)?;
    let template = ws.storage.get_template(input.template_id)?;
    let title = required(&input.title, "Item title")?;
    let instances = ws.storage.count_template_instances(template.id)?;
    if instances > 0 {
        return Err(Error::BadRequest(format!(
            "Template \"{}\" is used by {} checklist(s) and cannot gain items",
            template.name, instances
        )));
    }
    let description = clean(input.description);

    let item = ws.storage.append_template_item(
        template.id,
        &title,
        description.as_deref(),
        input.required,
    )?;
    ws.audit(
        caller,
        "template.addItem",
        "template",
        Some(template.id),
        &json!({"item_id": item.id, "title": item.title}),
    );
    ws.storage.get_template(template.id)
}

pub fn template_get(ws: &mut Workspace, _caller: &Caller, input: IdInput) -> Result<ChecklistTemplate> {
    ws.storage.get_template(input.id)
}

pub fn template_list(
    ws: &mut Workspace,
    _caller: &Caller,
    input: ListTemplates,
) -> Result<TemplateList> {
    let templates = ws.storage.list_templates(input.stage)?;
    Ok(TemplateList {
        count: templates.len(),
        templates,
    })
}

/// Delete a template. Refused once any checklist was created from it.
pub fn template_delete(ws: &mut Workspace, caller: &Caller, input: IdInput) -> Result<Deleted> {
    caller.require(Capability::ManageTemplates)?;
    let template = ws.storage.get_template(input.id)?;
    let instances = ws.storage.count_template_instances(template.id)?;
    if instances > 0 {
        return Err(Error::BadRequest(format!(
            "Template \"{}\" is used by {} checklist(s) and cannot be deleted",
            template.name, instances
        )));
    }

    ws.storage.delete_template(template.id)?;
    ws.audit(
        caller,
        "template.delete",
        "template",
        Some(template.id),
        &json!({"name": template.name}),
    );
    Ok(Deleted::new("template", template.id))
}

impl Output for ChecklistTemplate {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("#{} {} [{}]", self.id, self.name, self.stage)];
        if let Some(ref desc) = self.description {
            lines.push(format!("  {}", desc));
        }
        for item in &self.items {
            let marker = if item.required { "" } else { " (optional)" };
            lines.push(format!("  {}. {}{}", item.position, item.title, marker));
        }
        lines.join("\n")
    }
}

impl Output for TemplateList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.templates.is_empty() {
            return "No checklist templates.".to_string();
        }
        let mut lines = vec![format!("{} template(s):", self.count)];
        for t in &self.templates {
            lines.push(format!(
                "  #{} {} [{}] {} item(s)",
                t.id,
                t.name,
                t.stage,
                t.items.len()
            ));
        }
        lines.join("\n")
    }
}
