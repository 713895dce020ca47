use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TemplateRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub is_active: i64,
    pub frozen_by: Option<String>,
    pub frozen_at: Option<String>,
    pub usage_count: i64,
    pub created_by: String,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FieldRecord {
    pub id: String,
    pub template_id: String,
    pub label: String,
    pub field_type: String,
    pub help_text: String,
    pub placeholder: String,
    pub is_required: i64,
    pub is_readonly: i64,
    pub default_value: String,
    pub options: String,
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub sort_order: i64,
    pub conditional_logic: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChecklistRecord {
    pub id: String,
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub assigned_to: String,
    pub created_by: String,
    pub due_date: Option<String>,
    pub completed_at: Option<String>,
    pub total_fields: i64,
    pub completed_fields: i64,
    pub completion_percentage: f64,
    pub priority: String,
    pub tags: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChecklistListRecord {
    pub id: String,
    pub template_id: String,
    pub template_name: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub assigned_to: String,
    pub created_by: String,
    pub due_date: Option<String>,
    pub completed_at: Option<String>,
    pub total_fields: i64,
    pub completed_fields: i64,
    pub completion_percentage: f64,
    pub priority: String,
    pub tags: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ResponseRecord {
    pub id: String,
    pub checklist_id: String,
    pub field_id: String,
    pub value: String,
    pub is_completed: i64,
    pub responded_by: Option<String>,
    pub responded_at: Option<String>,
    pub comments: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChecklistResponseRecord {
    pub id: String,
    pub checklist_id: String,
    pub field_id: String,
    pub field_label: String,
    pub field_type: String,
    pub is_required: i64,
    pub sort_order: i64,
    pub value: String,
    pub is_completed: i64,
    pub responded_by: Option<String>,
    pub responded_at: Option<String>,
    pub comments: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CommentRecord {
    pub id: String,
    pub checklist_id: String,
    pub author: String,
    pub content: String,
    pub is_internal: i64,
    pub parent_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub template: TemplateRecord,
    pub fields_count: i64,
    pub checklists_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateDetails {
    pub template: TemplateRecord,
    pub fields: Vec<FieldRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateUsageStats {
    pub usage_count: i64,
    pub checklist_count: i64,
    pub completed_count: i64,
    pub in_progress_count: i64,
    pub recent: Vec<ChecklistRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChecklistDetails {
    pub checklist: ChecklistRecord,
    pub template_name: String,
    pub template_category: String,
    pub responses: Vec<ChecklistResponseRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressFieldEntry {
    pub field_id: String,
    pub label: String,
    pub field_type: String,
    pub is_required: bool,
    pub is_completed: bool,
    pub responded_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChecklistProgress {
    pub checklist_id: String,
    pub status: String,
    pub total_fields: i64,
    pub completed_fields: i64,
    pub completion_percentage: f64,
    pub fields: Vec<ProgressFieldEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChecklistExportData {
    pub checklist: ChecklistRecord,
    pub template: TemplateRecord,
    pub responses: Vec<ChecklistResponseRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub total_count: i64,
    pub completed_count: i64,
    pub in_progress_count: i64,
    pub overdue_count: i64,
    pub recent: Vec<ChecklistRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseSaved {
    pub response: ResponseRecord,
    pub checklist: ChecklistRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkResponseOutcome {
    pub updated_count: i64,
    pub checklist: ChecklistRecord,
}
