use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::query_builder::QueryBuilder;
use sqlx::{Any, AnyPool};
use uuid::Uuid;

use crate::db::models::{
    BulkResponseOutcome, ChecklistDetails, ChecklistExportData, ChecklistListRecord,
    ChecklistProgress, ChecklistRecord, ChecklistResponseRecord, CommentRecord, DashboardSummary,
    FieldRecord, ProgressFieldEntry, ResponseRecord, ResponseSaved, TemplateDetails,
    TemplateRecord, TemplateSummary, TemplateUsageStats,
};
use crate::error::{AppError, AppResult};
use crate::fields::{self, FieldDefinition, FieldOption, FieldType};

const TEMPLATE_COLUMNS: &str = r#"
    id,
    name,
    description,
    category,
    is_active,
    frozen_by,
    frozen_at,
    usage_count,
    created_by,
    deleted_at,
    created_at,
    updated_at
"#;

const FIELD_COLUMNS: &str = r#"
    id,
    template_id,
    label,
    field_type,
    help_text,
    placeholder,
    is_required,
    is_readonly,
    default_value,
    options,
    min_length,
    max_length,
    min_value,
    max_value,
    sort_order,
    conditional_logic,
    created_at,
    updated_at
"#;

const CHECKLIST_COLUMNS: &str = r#"
    id,
    template_id,
    name,
    description,
    status,
    assigned_to,
    created_by,
    due_date,
    completed_at,
    total_fields,
    completed_fields,
    completion_percentage,
    priority,
    tags,
    created_at,
    updated_at
"#;

#[derive(Debug, Clone)]
pub struct TemplateFilters {
    pub category: Option<String>,
    pub is_active: Option<bool>,
    pub is_frozen: Option<bool>,
    pub created_by: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTemplateInput {
    pub name: String,
    pub description: String,
    pub category: String,
    pub is_active: bool,
    pub fields: Vec<NewFieldInput>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct UpdateTemplateInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
    pub fields: Option<Vec<NewFieldInput>>,
}

#[derive(Debug, Clone)]
pub struct NewFieldInput {
    pub label: String,
    pub field_type: String,
    pub help_text: String,
    pub placeholder: String,
    pub is_required: bool,
    pub is_readonly: bool,
    pub default_value: String,
    pub options: Vec<FieldOption>,
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub sort_order: Option<i64>,
    pub conditional_logic: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct UpdateFieldInput {
    pub label: Option<String>,
    pub field_type: Option<String>,
    pub help_text: Option<String>,
    pub placeholder: Option<String>,
    pub is_required: Option<bool>,
    pub is_readonly: Option<bool>,
    pub default_value: Option<String>,
    pub options: Option<Vec<FieldOption>>,
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub sort_order: Option<i64>,
    pub conditional_logic: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct FieldOrderInput {
    pub id: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone)]
pub struct ChecklistFilters {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
    pub created_by: Option<String>,
    pub template_id: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewChecklistInput {
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub assigned_to: String,
    pub due_date: Option<String>,
    pub priority: String,
    pub tags: Vec<String>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct UpdateChecklistInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub assigned_to: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct SaveResponseInput {
    pub value: Value,
    pub is_completed: bool,
    pub comments: String,
    pub actor: String,
}

#[derive(Debug, Clone)]
pub struct BulkResponseInput {
    pub id: String,
    pub value: Option<Value>,
    pub is_completed: Option<bool>,
    pub comments: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCommentInput {
    pub content: String,
    pub is_internal: bool,
    pub parent_id: Option<String>,
    pub author: String,
}

pub async fn list_templates(
    pool: &AnyPool,
    filters: TemplateFilters,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<TemplateSummary>> {
    let mut query = QueryBuilder::<Any>::new(format!(
        "SELECT {TEMPLATE_COLUMNS} FROM checklist_templates WHERE deleted_at IS NULL"
    ));

    if let Some(category) = filters.category {
        query.push(" AND category = ");
        query.push_bind(category);
    }

    if let Some(is_active) = filters.is_active {
        query.push(" AND is_active = ");
        query.push_bind(i64::from(is_active));
    }

    if let Some(is_frozen) = filters.is_frozen {
        if is_frozen {
            query.push(" AND frozen_at IS NOT NULL");
        } else {
            query.push(" AND frozen_at IS NULL");
        }
    }

    if let Some(created_by) = filters.created_by {
        query.push(" AND created_by = ");
        query.push_bind(created_by);
    }

    if let Some(search) = filters.search {
        let pattern = format!("%{}%", search.trim().to_lowercase());
        query.push(" AND (LOWER(name) LIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR LOWER(description) LIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR LOWER(category) LIKE ");
        query.push_bind(pattern);
        query.push(')');
    }

    query.push(" ORDER BY created_at DESC LIMIT ");
    query.push_bind(limit);
    query.push(" OFFSET ");
    query.push_bind(offset);

    let templates = query
        .build_query_as::<TemplateRecord>()
        .fetch_all(pool)
        .await?;

    let mut summaries = Vec::with_capacity(templates.len());
    for template in templates {
        summaries.push(template_summary_for(pool, template).await?);
    }

    Ok(summaries)
}

pub async fn get_template(pool: &AnyPool, template_id: &str) -> AppResult<TemplateDetails> {
    let template = live_template_by_id(pool, template_id).await?;
    let fields = template_fields(pool, template_id).await?;

    Ok(TemplateDetails { template, fields })
}

pub async fn find_template_by_name(
    pool: &AnyPool,
    name: &str,
) -> AppResult<Option<TemplateRecord>> {
    let template = sqlx::query_as::<Any, TemplateRecord>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM checklist_templates WHERE name = ? AND deleted_at IS NULL"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(template)
}

pub async fn create_template(pool: &AnyPool, input: NewTemplateInput) -> AppResult<TemplateDetails> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest(
            "template name cannot be empty".to_string(),
        ));
    }

    for field in &input.fields {
        definition_from_input(field)?.validate()?;
    }

    let template_id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO checklist_templates (
            id,
            name,
            description,
            category,
            is_active,
            frozen_by,
            frozen_at,
            usage_count,
            created_by,
            deleted_at,
            created_at,
            updated_at
        )
        VALUES (?, ?, ?, ?, ?, NULL, NULL, 0, ?, NULL, ?, ?)
        "#,
    )
    .bind(&template_id)
    .bind(&name)
    .bind(input.description.trim())
    .bind(input.category.trim())
    .bind(i64::from(input.is_active))
    .bind(&input.created_by)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    insert_field_rows(&mut tx, &template_id, &input.fields, 0, &now).await?;

    tx.commit().await?;
    get_template(pool, &template_id).await
}

pub async fn update_template(
    pool: &AnyPool,
    template_id: &str,
    input: UpdateTemplateInput,
) -> AppResult<TemplateDetails> {
    if input.name.is_none()
        && input.description.is_none()
        && input.category.is_none()
        && input.is_active.is_none()
        && input.fields.is_none()
    {
        return Err(AppError::BadRequest(
            "template update requires at least one field".to_string(),
        ));
    }

    let existing = live_template_by_id(pool, template_id).await?;
    ensure_editable(&existing)?;

    let name = match input.name {
        Some(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::BadRequest(
                    "template name cannot be empty".to_string(),
                ));
            }
            trimmed
        }
        None => existing.name,
    };

    let description = input
        .description
        .map(|value| value.trim().to_string())
        .unwrap_or(existing.description);
    let category = input
        .category
        .map(|value| value.trim().to_string())
        .unwrap_or(existing.category);
    let is_active = input
        .is_active
        .map(i64::from)
        .unwrap_or(existing.is_active);

    if let Some(replacements) = &input.fields {
        for field in replacements {
            definition_from_input(field)?.validate()?;
        }
    }

    let now = now_timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE checklist_templates
        SET name = ?, description = ?, category = ?, is_active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&name)
    .bind(&description)
    .bind(&category)
    .bind(is_active)
    .bind(&now)
    .bind(template_id)
    .execute(&mut *tx)
    .await?;

    if let Some(replacements) = input.fields {
        sqlx::query(
            r#"
            DELETE FROM checklist_responses
            WHERE field_id IN (SELECT id FROM checklist_fields WHERE template_id = ?)
            "#,
        )
        .bind(template_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM checklist_fields WHERE template_id = ?")
            .bind(template_id)
            .execute(&mut *tx)
            .await?;

        insert_field_rows(&mut tx, template_id, &replacements, 0, &now).await?;
        recalculate_template_checklists(&mut tx, template_id, &now).await?;
    }

    tx.commit().await?;
    get_template(pool, template_id).await
}

pub async fn delete_template(pool: &AnyPool, template_id: &str) -> AppResult<()> {
    let template = live_template_by_id(pool, template_id).await?;

    let checklist_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM checklists WHERE template_id = ?")
            .bind(template_id)
            .fetch_one(pool)
            .await?;

    if checklist_count > 0 {
        return Err(AppError::BadRequest(format!(
            "template '{}' is referenced by {checklist_count} checklist(s) and cannot be deleted",
            template.name
        )));
    }

    let now = now_timestamp();
    sqlx::query("UPDATE checklist_templates SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&now)
        .bind(template_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn freeze_template(
    pool: &AnyPool,
    template_id: &str,
    actor: &str,
) -> AppResult<TemplateDetails> {
    let template = live_template_by_id(pool, template_id).await?;

    if template.frozen_at.is_none() {
        let now = now_timestamp();
        sqlx::query(
            "UPDATE checklist_templates SET frozen_by = ?, frozen_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(actor)
        .bind(&now)
        .bind(&now)
        .bind(template_id)
        .execute(pool)
        .await?;
    }

    get_template(pool, template_id).await
}

pub async fn unfreeze_template(pool: &AnyPool, template_id: &str) -> AppResult<TemplateDetails> {
    let template = live_template_by_id(pool, template_id).await?;

    if template.frozen_at.is_some() {
        let now = now_timestamp();
        sqlx::query(
            "UPDATE checklist_templates SET frozen_by = NULL, frozen_at = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(template_id)
        .execute(pool)
        .await?;
    }

    get_template(pool, template_id).await
}

pub async fn duplicate_template(
    pool: &AnyPool,
    template_id: &str,
    actor: &str,
) -> AppResult<TemplateDetails> {
    let source = live_template_by_id(pool, template_id).await?;
    let source_fields = template_fields(pool, template_id).await?;

    let copy_id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO checklist_templates (
            id,
            name,
            description,
            category,
            is_active,
            frozen_by,
            frozen_at,
            usage_count,
            created_by,
            deleted_at,
            created_at,
            updated_at
        )
        VALUES (?, ?, ?, ?, ?, NULL, NULL, 0, ?, NULL, ?, ?)
        "#,
    )
    .bind(&copy_id)
    .bind(format!("Copy of {}", source.name))
    .bind(&source.description)
    .bind(&source.category)
    .bind(source.is_active)
    .bind(actor)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    for field in &source_fields {
        sqlx::query(
            r#"
            INSERT INTO checklist_fields (
                id,
                template_id,
                label,
                field_type,
                help_text,
                placeholder,
                is_required,
                is_readonly,
                default_value,
                options,
                min_length,
                max_length,
                min_value,
                max_value,
                sort_order,
                conditional_logic,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&copy_id)
        .bind(&field.label)
        .bind(&field.field_type)
        .bind(&field.help_text)
        .bind(&field.placeholder)
        .bind(field.is_required)
        .bind(field.is_readonly)
        .bind(&field.default_value)
        .bind(&field.options)
        .bind(field.min_length)
        .bind(field.max_length)
        .bind(field.min_value)
        .bind(field.max_value)
        .bind(field.sort_order)
        .bind(&field.conditional_logic)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    get_template(pool, &copy_id).await
}

pub async fn template_usage_stats(
    pool: &AnyPool,
    template_id: &str,
) -> AppResult<TemplateUsageStats> {
    let template = live_template_by_id(pool, template_id).await?;

    let checklist_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM checklists WHERE template_id = ?")
            .bind(template_id)
            .fetch_one(pool)
            .await?;

    let completed_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM checklists WHERE template_id = ? AND status = 'completed'",
    )
    .bind(template_id)
    .fetch_one(pool)
    .await?;

    let in_progress_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM checklists WHERE template_id = ? AND status = 'in_progress'",
    )
    .bind(template_id)
    .fetch_one(pool)
    .await?;

    let recent = sqlx::query_as::<Any, ChecklistRecord>(&format!(
        r#"
        SELECT {CHECKLIST_COLUMNS}
        FROM checklists
        WHERE template_id = ?
        ORDER BY created_at DESC
        LIMIT 5
        "#
    ))
    .bind(template_id)
    .fetch_all(pool)
    .await?;

    Ok(TemplateUsageStats {
        usage_count: template.usage_count,
        checklist_count,
        completed_count,
        in_progress_count,
        recent,
    })
}

pub async fn template_categories(pool: &AnyPool) -> AppResult<Vec<String>> {
    let categories: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT category
        FROM checklist_templates
        WHERE deleted_at IS NULL AND category <> ''
        ORDER BY category ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(categories)
}

pub async fn popular_templates(pool: &AnyPool, limit: i64) -> AppResult<Vec<TemplateSummary>> {
    let templates = sqlx::query_as::<Any, TemplateRecord>(&format!(
        r#"
        SELECT {TEMPLATE_COLUMNS}
        FROM checklist_templates
        WHERE deleted_at IS NULL AND is_active = 1
        ORDER BY usage_count DESC, created_at DESC
        LIMIT ?
        "#
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut summaries = Vec::with_capacity(templates.len());
    for template in templates {
        summaries.push(template_summary_for(pool, template).await?);
    }

    Ok(summaries)
}

pub async fn list_template_fields(
    pool: &AnyPool,
    template_id: &str,
) -> AppResult<Vec<FieldRecord>> {
    live_template_by_id(pool, template_id).await?;
    template_fields(pool, template_id).await
}

pub async fn create_fields(
    pool: &AnyPool,
    template_id: &str,
    inputs: Vec<NewFieldInput>,
) -> AppResult<Vec<FieldRecord>> {
    if inputs.is_empty() {
        return Err(AppError::BadRequest(
            "fields cannot be empty".to_string(),
        ));
    }

    let template = live_template_by_id(pool, template_id).await?;
    ensure_editable(&template)?;

    for field in &inputs {
        definition_from_input(field)?.validate()?;
    }

    let now = now_timestamp();
    let mut tx = pool.begin().await?;

    let base_order: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM checklist_fields WHERE template_id = ?",
    )
    .bind(template_id)
    .fetch_one(&mut *tx)
    .await?;

    let created_ids = insert_field_rows(&mut tx, template_id, &inputs, base_order, &now).await?;

    tx.commit().await?;

    let mut created = Vec::with_capacity(created_ids.len());
    for field_id in created_ids {
        created.push(template_field(pool, template_id, &field_id).await?);
    }

    Ok(created)
}

pub async fn update_field(
    pool: &AnyPool,
    template_id: &str,
    field_id: &str,
    input: UpdateFieldInput,
) -> AppResult<FieldRecord> {
    let template = live_template_by_id(pool, template_id).await?;
    ensure_editable(&template)?;

    let existing = template_field(pool, template_id, field_id).await?;

    let label = match input.label {
        Some(value) => value,
        None => existing.label,
    };
    let field_type = input.field_type.unwrap_or(existing.field_type);
    let help_text = input.help_text.unwrap_or(existing.help_text);
    let placeholder = input.placeholder.unwrap_or(existing.placeholder);
    let is_required = input
        .is_required
        .map(i64::from)
        .unwrap_or(existing.is_required);
    let is_readonly = input
        .is_readonly
        .map(i64::from)
        .unwrap_or(existing.is_readonly);
    let default_value = input.default_value.unwrap_or(existing.default_value);
    let options = match input.options {
        Some(options) => options,
        None => fields::parse_options_json(&existing.options)?,
    };
    let min_length = input.min_length.or(existing.min_length);
    let max_length = input.max_length.or(existing.max_length);
    let min_value = input.min_value.or(existing.min_value);
    let max_value = input.max_value.or(existing.max_value);
    let sort_order = input.sort_order.unwrap_or(existing.sort_order);
    let conditional_logic = match input.conditional_logic {
        Some(logic) => conditional_logic_json(label.trim(), &Some(logic))?,
        None => existing.conditional_logic,
    };

    let definition = FieldDefinition {
        label: label.clone(),
        field_type: FieldType::parse(&field_type)?,
        is_required: is_required != 0,
        options: options.clone(),
        min_length,
        max_length,
        min_value,
        max_value,
    };
    definition.validate()?;

    let options_json = options_json(label.trim(), &options)?;
    let now = now_timestamp();

    sqlx::query(
        r#"
        UPDATE checklist_fields
        SET
            label = ?,
            field_type = ?,
            help_text = ?,
            placeholder = ?,
            is_required = ?,
            is_readonly = ?,
            default_value = ?,
            options = ?,
            min_length = ?,
            max_length = ?,
            min_value = ?,
            max_value = ?,
            sort_order = ?,
            conditional_logic = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(label.trim())
    .bind(&field_type)
    .bind(&help_text)
    .bind(&placeholder)
    .bind(is_required)
    .bind(is_readonly)
    .bind(&default_value)
    .bind(&options_json)
    .bind(min_length)
    .bind(max_length)
    .bind(min_value)
    .bind(max_value)
    .bind(sort_order)
    .bind(&conditional_logic)
    .bind(&now)
    .bind(field_id)
    .execute(pool)
    .await?;

    template_field(pool, template_id, field_id).await
}

pub async fn delete_field(pool: &AnyPool, template_id: &str, field_id: &str) -> AppResult<()> {
    let template = live_template_by_id(pool, template_id).await?;
    ensure_editable(&template)?;
    template_field(pool, template_id, field_id).await?;

    let now = now_timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM checklist_responses WHERE field_id = ?")
        .bind(field_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM checklist_fields WHERE id = ?")
        .bind(field_id)
        .execute(&mut *tx)
        .await?;

    recalculate_template_checklists(&mut tx, template_id, &now).await?;

    tx.commit().await?;
    Ok(())
}

pub async fn reorder_fields(
    pool: &AnyPool,
    template_id: &str,
    orders: Vec<FieldOrderInput>,
) -> AppResult<Vec<FieldRecord>> {
    if orders.is_empty() {
        return Err(AppError::BadRequest("orders cannot be empty".to_string()));
    }

    let template = live_template_by_id(pool, template_id).await?;
    ensure_editable(&template)?;

    let known_ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM checklist_fields WHERE template_id = ?")
            .bind(template_id)
            .fetch_all(pool)
            .await?;
    let known_ids: std::collections::BTreeSet<String> = known_ids.into_iter().collect();

    let mut seen = std::collections::BTreeSet::new();
    for order in &orders {
        if !known_ids.contains(&order.id) {
            return Err(AppError::NotFound(format!(
                "field '{}' not found on this template",
                order.id
            )));
        }
        if !seen.insert(order.id.clone()) {
            return Err(AppError::BadRequest(format!(
                "duplicate field id '{}' in orders",
                order.id
            )));
        }
    }

    let now = now_timestamp();
    let mut tx = pool.begin().await?;

    for order in &orders {
        sqlx::query("UPDATE checklist_fields SET sort_order = ?, updated_at = ? WHERE id = ?")
            .bind(order.sort_order)
            .bind(&now)
            .bind(&order.id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    template_fields(pool, template_id).await
}

pub async fn duplicate_field(
    pool: &AnyPool,
    template_id: &str,
    field_id: &str,
) -> AppResult<FieldRecord> {
    let template = live_template_by_id(pool, template_id).await?;
    ensure_editable(&template)?;
    let source = template_field(pool, template_id, field_id).await?;

    let next_order: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM checklist_fields WHERE template_id = ?",
    )
    .bind(template_id)
    .fetch_one(pool)
    .await?;

    let copy_id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    sqlx::query(
        r#"
        INSERT INTO checklist_fields (
            id,
            template_id,
            label,
            field_type,
            help_text,
            placeholder,
            is_required,
            is_readonly,
            default_value,
            options,
            min_length,
            max_length,
            min_value,
            max_value,
            sort_order,
            conditional_logic,
            created_at,
            updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&copy_id)
    .bind(template_id)
    .bind(format!("Copy of {}", source.label))
    .bind(&source.field_type)
    .bind(&source.help_text)
    .bind(&source.placeholder)
    .bind(source.is_required)
    .bind(source.is_readonly)
    .bind(&source.default_value)
    .bind(&source.options)
    .bind(source.min_length)
    .bind(source.max_length)
    .bind(source.min_value)
    .bind(source.max_value)
    .bind(next_order)
    .bind(&source.conditional_logic)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    template_field(pool, template_id, &copy_id).await
}

pub async fn list_checklists(
    pool: &AnyPool,
    filters: ChecklistFilters,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<ChecklistListRecord>> {
    if let Some(status) = filters.status.as_deref() {
        validate_status(status)?;
    }

    if let Some(priority) = filters.priority.as_deref() {
        validate_priority(priority)?;
    }

    let mut query = QueryBuilder::<Any>::new(
        r#"
        SELECT
            c.id,
            c.template_id,
            t.name AS template_name,
            c.name,
            c.description,
            c.status,
            c.assigned_to,
            c.created_by,
            c.due_date,
            c.completed_at,
            c.total_fields,
            c.completed_fields,
            c.completion_percentage,
            c.priority,
            c.tags,
            c.created_at,
            c.updated_at
        FROM checklists c
        INNER JOIN checklist_templates t ON t.id = c.template_id
        WHERE 1 = 1
        "#,
    );

    if let Some(status) = filters.status {
        query.push(" AND c.status = ");
        query.push_bind(status);
    }

    if let Some(priority) = filters.priority {
        query.push(" AND c.priority = ");
        query.push_bind(priority);
    }

    if let Some(assigned_to) = filters.assigned_to {
        query.push(" AND c.assigned_to = ");
        query.push_bind(assigned_to);
    }

    if let Some(created_by) = filters.created_by {
        query.push(" AND c.created_by = ");
        query.push_bind(created_by);
    }

    if let Some(template_id) = filters.template_id {
        query.push(" AND c.template_id = ");
        query.push_bind(template_id);
    }

    if let Some(search) = filters.search {
        let pattern = format!("%{}%", search.trim().to_lowercase());
        query.push(" AND (LOWER(c.name) LIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR LOWER(c.description) LIKE ");
        query.push_bind(pattern);
        query.push(')');
    }

    query.push(" ORDER BY c.created_at DESC LIMIT ");
    query.push_bind(limit);
    query.push(" OFFSET ");
    query.push_bind(offset);

    let checklists = query
        .build_query_as::<ChecklistListRecord>()
        .fetch_all(pool)
        .await?;

    Ok(checklists)
}

pub async fn get_checklist(pool: &AnyPool, checklist_id: &str) -> AppResult<ChecklistDetails> {
    let checklist = checklist_by_id(pool, checklist_id).await?;

    let template = sqlx::query_as::<Any, TemplateRecord>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM checklist_templates WHERE id = ?"
    ))
    .bind(&checklist.template_id)
    .fetch_one(pool)
    .await?;

    let responses = checklist_responses(pool, checklist_id).await?;

    Ok(ChecklistDetails {
        checklist,
        template_name: template.name,
        template_category: template.category,
        responses,
    })
}

pub async fn create_checklist(
    pool: &AnyPool,
    input: NewChecklistInput,
) -> AppResult<ChecklistDetails> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest(
            "checklist name cannot be empty".to_string(),
        ));
    }

    validate_priority(&input.priority)?;

    let assigned_to = input.assigned_to.trim().to_string();
    if assigned_to.is_empty() {
        return Err(AppError::BadRequest(
            "checklist assignee cannot be empty".to_string(),
        ));
    }

    let due_date = match input.due_date.as_deref() {
        Some(value) if !value.trim().is_empty() => Some(normalize_due_date(value)?),
        _ => None,
    };
    let tags_json = tags_json(normalized_tags(input.tags))?;

    let now = now_timestamp();
    let checklist_id = Uuid::new_v4().to_string();

    let mut tx = pool.begin().await?;

    let template = sqlx::query_as::<Any, TemplateRecord>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM checklist_templates WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(&input.template_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("template '{}' not found", input.template_id)))?;

    if template.is_active == 0 {
        return Err(AppError::BadRequest(format!(
            "template '{}' is inactive and cannot be instantiated",
            template.name
        )));
    }

    let field_ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT id
        FROM checklist_fields
        WHERE template_id = ? AND field_type <> 'section'
        ORDER BY sort_order ASC, created_at ASC
        "#,
    )
    .bind(&input.template_id)
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO checklists (
            id,
            template_id,
            name,
            description,
            status,
            assigned_to,
            created_by,
            due_date,
            completed_at,
            total_fields,
            completed_fields,
            completion_percentage,
            priority,
            tags,
            created_at,
            updated_at
        )
        VALUES (?, ?, ?, ?, 'draft', ?, ?, ?, NULL, ?, 0, 0, ?, ?, ?, ?)
        "#,
    )
    .bind(&checklist_id)
    .bind(&input.template_id)
    .bind(&name)
    .bind(input.description.trim())
    .bind(&assigned_to)
    .bind(&input.created_by)
    .bind(&due_date)
    .bind(field_ids.len() as i64)
    .bind(&input.priority)
    .bind(&tags_json)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    for field_id in &field_ids {
        sqlx::query(
            r#"
            INSERT INTO checklist_responses (
                id,
                checklist_id,
                field_id,
                value,
                is_completed,
                responded_by,
                responded_at,
                comments,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, '{}', 0, NULL, NULL, '', ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&checklist_id)
        .bind(field_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "UPDATE checklist_templates SET usage_count = usage_count + 1, updated_at = ? WHERE id = ?",
    )
    .bind(&now)
    .bind(&input.template_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    get_checklist(pool, &checklist_id).await
}

pub async fn update_checklist(
    pool: &AnyPool,
    checklist_id: &str,
    input: UpdateChecklistInput,
) -> AppResult<ChecklistDetails> {
    let existing = checklist_by_id(pool, checklist_id).await?;

    let name = match input.name {
        Some(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::BadRequest(
                    "checklist name cannot be empty".to_string(),
                ));
            }
            trimmed
        }
        None => existing.name.clone(),
    };

    let description = input
        .description
        .map(|value| value.trim().to_string())
        .unwrap_or(existing.description.clone());

    let assigned_to = match input.assigned_to {
        Some(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::BadRequest(
                    "checklist assignee cannot be empty".to_string(),
                ));
            }
            trimmed
        }
        None => existing.assigned_to.clone(),
    };

    let due_date = match input.due_date {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(normalize_due_date(trimmed)?)
            }
        }
        None => existing.due_date.clone(),
    };

    let priority = match input.priority {
        Some(value) => {
            validate_priority(&value)?;
            value
        }
        None => existing.priority.clone(),
    };

    let tags = match input.tags {
        Some(tags) => tags_json(normalized_tags(tags))?,
        None => existing.tags.clone(),
    };

    let status = match input.status {
        Some(value) => {
            validate_status(&value)?;
            value
        }
        None => existing.status.clone(),
    };

    let now = now_timestamp();
    let mut tx = pool.begin().await?;

    let completed_at = if status == "completed" {
        if existing.status != "completed" {
            let outstanding =
                outstanding_required_count(&mut tx, checklist_id, &existing.template_id).await?;
            if outstanding > 0 {
                return Err(AppError::BadRequest(format!(
                    "cannot complete checklist '{}': {outstanding} required field(s) outstanding",
                    existing.name
                )));
            }
        }
        existing.completed_at.clone().or(Some(now.clone()))
    } else {
        None
    };

    sqlx::query(
        r#"
        UPDATE checklists
        SET
            name = ?,
            description = ?,
            status = ?,
            assigned_to = ?,
            due_date = ?,
            completed_at = ?,
            priority = ?,
            tags = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&name)
    .bind(&description)
    .bind(&status)
    .bind(&assigned_to)
    .bind(&due_date)
    .bind(&completed_at)
    .bind(&priority)
    .bind(&tags)
    .bind(&now)
    .bind(checklist_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    get_checklist(pool, checklist_id).await
}

pub async fn set_checklist_status(
    pool: &AnyPool,
    checklist_id: &str,
    status: &str,
) -> AppResult<ChecklistDetails> {
    update_checklist(
        pool,
        checklist_id,
        UpdateChecklistInput {
            name: None,
            description: None,
            status: Some(status.to_string()),
            assigned_to: None,
            due_date: None,
            priority: None,
            tags: None,
        },
    )
    .await
}

pub async fn delete_checklist(pool: &AnyPool, checklist_id: &str) -> AppResult<()> {
    checklist_by_id(pool, checklist_id).await?;

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM checklist_comments WHERE checklist_id = ?")
        .bind(checklist_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM checklist_responses WHERE checklist_id = ?")
        .bind(checklist_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM checklists WHERE id = ?")
        .bind(checklist_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn checklist_progress(
    pool: &AnyPool,
    checklist_id: &str,
) -> AppResult<ChecklistProgress> {
    let checklist = checklist_by_id(pool, checklist_id).await?;
    let responses = checklist_responses(pool, checklist_id).await?;

    let fields = responses
        .into_iter()
        .map(|response| ProgressFieldEntry {
            field_id: response.field_id,
            label: response.field_label,
            field_type: response.field_type,
            is_required: response.is_required != 0,
            is_completed: response.is_completed != 0,
            responded_at: response.responded_at,
        })
        .collect();

    Ok(ChecklistProgress {
        checklist_id: checklist.id,
        status: checklist.status,
        total_fields: checklist.total_fields,
        completed_fields: checklist.completed_fields,
        completion_percentage: checklist.completion_percentage,
        fields,
    })
}

pub async fn checklist_export_data(
    pool: &AnyPool,
    checklist_id: &str,
) -> AppResult<ChecklistExportData> {
    let checklist = checklist_by_id(pool, checklist_id).await?;

    let template = sqlx::query_as::<Any, TemplateRecord>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM checklist_templates WHERE id = ?"
    ))
    .bind(&checklist.template_id)
    .fetch_one(pool)
    .await?;

    let responses = checklist_responses(pool, checklist_id).await?;

    Ok(ChecklistExportData {
        checklist,
        template,
        responses,
    })
}

pub async fn duplicate_checklist(
    pool: &AnyPool,
    checklist_id: &str,
    actor: &str,
) -> AppResult<ChecklistDetails> {
    let source = checklist_by_id(pool, checklist_id).await?;
    let tags = parse_tags(&source.tags)?;

    create_checklist(
        pool,
        NewChecklistInput {
            template_id: source.template_id,
            name: format!("Copy of {}", source.name),
            description: source.description,
            assigned_to: source.assigned_to,
            due_date: source.due_date,
            priority: source.priority,
            tags,
            created_by: actor.to_string(),
        },
    )
    .await
}

pub async fn dashboard_summary(pool: &AnyPool, actor: &str) -> AppResult<DashboardSummary> {
    let total_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM checklists WHERE assigned_to = ? OR created_by = ?",
    )
    .bind(actor)
    .bind(actor)
    .fetch_one(pool)
    .await?;

    let completed_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM checklists WHERE (assigned_to = ? OR created_by = ?) AND status = 'completed'",
    )
    .bind(actor)
    .bind(actor)
    .fetch_one(pool)
    .await?;

    let in_progress_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM checklists WHERE (assigned_to = ? OR created_by = ?) AND status = 'in_progress'",
    )
    .bind(actor)
    .bind(actor)
    .fetch_one(pool)
    .await?;

    let now = now_timestamp();
    let overdue_count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM checklists
        WHERE (assigned_to = ? OR created_by = ?)
          AND due_date IS NOT NULL
          AND due_date < ?
          AND status IN ('draft', 'in_progress')
        "#,
    )
    .bind(actor)
    .bind(actor)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    let recent = sqlx::query_as::<Any, ChecklistRecord>(&format!(
        r#"
        SELECT {CHECKLIST_COLUMNS}
        FROM checklists
        WHERE assigned_to = ? OR created_by = ?
        ORDER BY updated_at DESC
        LIMIT 5
        "#
    ))
    .bind(actor)
    .bind(actor)
    .fetch_all(pool)
    .await?;

    Ok(DashboardSummary {
        total_count,
        completed_count,
        in_progress_count,
        overdue_count,
        recent,
    })
}

pub async fn list_checklist_responses(
    pool: &AnyPool,
    checklist_id: &str,
) -> AppResult<Vec<ChecklistResponseRecord>> {
    checklist_by_id(pool, checklist_id).await?;
    checklist_responses(pool, checklist_id).await
}

pub async fn save_response(
    pool: &AnyPool,
    checklist_id: &str,
    field_id: &str,
    input: SaveResponseInput,
) -> AppResult<ResponseSaved> {
    // A concurrent first submission can win the insert; the unique
    // constraint surfaces as Conflict and the retry lands on the update path.
    match save_response_attempt(pool, checklist_id, field_id, input.clone()).await {
        Err(AppError::Conflict(_)) => {
            save_response_attempt(pool, checklist_id, field_id, input).await
        }
        result => result,
    }
}

async fn save_response_attempt(
    pool: &AnyPool,
    checklist_id: &str,
    field_id: &str,
    input: SaveResponseInput,
) -> AppResult<ResponseSaved> {
    let mut tx = pool.begin().await?;

    let checklist = sqlx::query_as::<Any, ChecklistRecord>(&format!(
        "SELECT {CHECKLIST_COLUMNS} FROM checklists WHERE id = ?"
    ))
    .bind(checklist_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("checklist '{checklist_id}' not found")))?;

    ensure_accepts_responses(&checklist)?;

    let field = sqlx::query_as::<Any, FieldRecord>(&format!(
        "SELECT {FIELD_COLUMNS} FROM checklist_fields WHERE id = ? AND template_id = ?"
    ))
    .bind(field_id)
    .bind(&checklist.template_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("field '{field_id}' not found on this checklist")))?;

    let definition = definition_from_record(&field)?;
    let parsed = definition.parse_value(&input.value)?;
    if input.is_completed {
        definition.validate_complete(&parsed)?;
    }

    let value_json = parsed.to_json().to_string();
    let now = now_timestamp();

    let existing = sqlx::query_as::<Any, ResponseRecord>(
        r#"
        SELECT id, checklist_id, field_id, value, is_completed, responded_by, responded_at,
               comments, created_at, updated_at
        FROM checklist_responses
        WHERE checklist_id = ? AND field_id = ?
        "#,
    )
    .bind(checklist_id)
    .bind(field_id)
    .fetch_optional(&mut *tx)
    .await?;

    let response_id = match existing {
        Some(existing) => {
            let was_completed = existing.is_completed != 0;
            let (responded_by, responded_at) = if input.is_completed && !was_completed {
                (Some(input.actor.clone()), Some(now.clone()))
            } else if input.is_completed {
                (existing.responded_by, existing.responded_at)
            } else {
                (None, None)
            };

            sqlx::query(
                r#"
                UPDATE checklist_responses
                SET value = ?, is_completed = ?, responded_by = ?, responded_at = ?,
                    comments = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&value_json)
            .bind(i64::from(input.is_completed))
            .bind(&responded_by)
            .bind(&responded_at)
            .bind(&input.comments)
            .bind(&now)
            .bind(&existing.id)
            .execute(&mut *tx)
            .await?;

            existing.id
        }
        None => {
            let response_id = Uuid::new_v4().to_string();
            let (responded_by, responded_at) = if input.is_completed {
                (Some(input.actor.clone()), Some(now.clone()))
            } else {
                (None, None)
            };

            sqlx::query(
                r#"
                INSERT INTO checklist_responses (
                    id,
                    checklist_id,
                    field_id,
                    value,
                    is_completed,
                    responded_by,
                    responded_at,
                    comments,
                    created_at,
                    updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&response_id)
            .bind(checklist_id)
            .bind(field_id)
            .bind(&value_json)
            .bind(i64::from(input.is_completed))
            .bind(&responded_by)
            .bind(&responded_at)
            .bind(&input.comments)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            response_id
        }
    };

    recalculate_progress(&mut tx, checklist_id, &now).await?;
    tx.commit().await?;

    let response = sqlx::query_as::<Any, ResponseRecord>(
        r#"
        SELECT id, checklist_id, field_id, value, is_completed, responded_by, responded_at,
               comments, created_at, updated_at
        FROM checklist_responses
        WHERE id = ?
        "#,
    )
    .bind(&response_id)
    .fetch_one(pool)
    .await?;

    let checklist = checklist_by_id(pool, checklist_id).await?;

    Ok(ResponseSaved {
        response,
        checklist,
    })
}

pub async fn bulk_update_responses(
    pool: &AnyPool,
    checklist_id: &str,
    entries: Vec<BulkResponseInput>,
    actor: &str,
) -> AppResult<BulkResponseOutcome> {
    if entries.is_empty() {
        return Err(AppError::BadRequest(
            "responses cannot be empty".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let checklist = sqlx::query_as::<Any, ChecklistRecord>(&format!(
        "SELECT {CHECKLIST_COLUMNS} FROM checklists WHERE id = ?"
    ))
    .bind(checklist_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("checklist '{checklist_id}' not found")))?;

    ensure_accepts_responses(&checklist)?;

    let template_fields = sqlx::query_as::<Any, FieldRecord>(&format!(
        "SELECT {FIELD_COLUMNS} FROM checklist_fields WHERE template_id = ?"
    ))
    .bind(&checklist.template_id)
    .fetch_all(&mut *tx)
    .await?;
    let fields_by_id: std::collections::BTreeMap<String, FieldRecord> = template_fields
        .into_iter()
        .map(|field| (field.id.clone(), field))
        .collect();

    struct PlannedUpdate {
        response_id: String,
        value_json: String,
        is_completed: bool,
        responded_by: Option<String>,
        responded_at: Option<String>,
        comments: String,
    }

    let now = now_timestamp();
    let mut seen = std::collections::BTreeSet::new();
    let mut planned = Vec::with_capacity(entries.len());

    for entry in entries {
        if !seen.insert(entry.id.clone()) {
            return Err(AppError::BadRequest(format!(
                "duplicate response id '{}' in responses",
                entry.id
            )));
        }

        let existing = sqlx::query_as::<Any, ResponseRecord>(
            r#"
            SELECT id, checklist_id, field_id, value, is_completed, responded_by, responded_at,
                   comments, created_at, updated_at
            FROM checklist_responses
            WHERE id = ? AND checklist_id = ?
            "#,
        )
        .bind(&entry.id)
        .bind(checklist_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "response '{}' not found on this checklist",
                entry.id
            ))
        })?;

        let field = fields_by_id.get(&existing.field_id).ok_or_else(|| {
            tracing::error!(
                response_id = %existing.id,
                field_id = %existing.field_id,
                "response references a field missing from its template"
            );
            AppError::Internal
        })?;

        let definition = definition_from_record(field)?;
        let parsed = match &entry.value {
            Some(value) => definition.parse_value(value)?,
            None => {
                let stored: Value = serde_json::from_str(&existing.value).map_err(|error| {
                    tracing::error!(error = ?error, response_id = %existing.id, "failed to parse stored response value");
                    AppError::Internal
                })?;
                definition.parse_value(&stored)?
            }
        };

        let was_completed = existing.is_completed != 0;
        let is_completed = entry.is_completed.unwrap_or(was_completed);
        if is_completed {
            definition.validate_complete(&parsed)?;
        }

        let (responded_by, responded_at) = if is_completed && !was_completed {
            (Some(actor.to_string()), Some(now.clone()))
        } else if is_completed {
            (existing.responded_by.clone(), existing.responded_at.clone())
        } else {
            (None, None)
        };

        planned.push(PlannedUpdate {
            response_id: existing.id,
            value_json: parsed.to_json().to_string(),
            is_completed,
            responded_by,
            responded_at,
            comments: entry.comments.unwrap_or(existing.comments),
        });
    }

    let updated_count = planned.len() as i64;

    for update in planned {
        sqlx::query(
            r#"
            UPDATE checklist_responses
            SET value = ?, is_completed = ?, responded_by = ?, responded_at = ?,
                comments = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.value_json)
        .bind(i64::from(update.is_completed))
        .bind(&update.responded_by)
        .bind(&update.responded_at)
        .bind(&update.comments)
        .bind(&now)
        .bind(&update.response_id)
        .execute(&mut *tx)
        .await?;
    }

    recalculate_progress(&mut tx, checklist_id, &now).await?;
    tx.commit().await?;

    let checklist = checklist_by_id(pool, checklist_id).await?;

    Ok(BulkResponseOutcome {
        updated_count,
        checklist,
    })
}

pub async fn list_comments(pool: &AnyPool, checklist_id: &str) -> AppResult<Vec<CommentRecord>> {
    checklist_by_id(pool, checklist_id).await?;

    let comments = sqlx::query_as::<Any, CommentRecord>(
        r#"
        SELECT id, checklist_id, author, content, is_internal, parent_id, created_at
        FROM checklist_comments
        WHERE checklist_id = ?
        ORDER BY created_at ASC
        "#,
    )
    .bind(checklist_id)
    .fetch_all(pool)
    .await?;

    Ok(comments)
}

pub async fn create_comment(
    pool: &AnyPool,
    checklist_id: &str,
    input: NewCommentInput,
) -> AppResult<CommentRecord> {
    checklist_by_id(pool, checklist_id).await?;

    let content = input.content.trim().to_string();
    if content.is_empty() {
        return Err(AppError::BadRequest(
            "comment content cannot be empty".to_string(),
        ));
    }

    if let Some(parent_id) = &input.parent_id {
        let parent_exists: Option<String> = sqlx::query_scalar(
            "SELECT id FROM checklist_comments WHERE id = ? AND checklist_id = ?",
        )
        .bind(parent_id)
        .bind(checklist_id)
        .fetch_optional(pool)
        .await?;

        if parent_exists.is_none() {
            return Err(AppError::NotFound(format!(
                "parent comment '{parent_id}' not found on this checklist"
            )));
        }
    }

    let comment_id = Uuid::new_v4().to_string();
    let now = now_timestamp();

    sqlx::query(
        r#"
        INSERT INTO checklist_comments (
            id,
            checklist_id,
            author,
            content,
            is_internal,
            parent_id,
            created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&comment_id)
    .bind(checklist_id)
    .bind(&input.author)
    .bind(&content)
    .bind(i64::from(input.is_internal))
    .bind(&input.parent_id)
    .bind(&now)
    .execute(pool)
    .await?;

    let comment = sqlx::query_as::<Any, CommentRecord>(
        r#"
        SELECT id, checklist_id, author, content, is_internal, parent_id, created_at
        FROM checklist_comments
        WHERE id = ?
        "#,
    )
    .bind(&comment_id)
    .fetch_one(pool)
    .await?;

    Ok(comment)
}

pub async fn delete_comment(
    pool: &AnyPool,
    checklist_id: &str,
    comment_id: &str,
) -> AppResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE checklist_comments SET parent_id = NULL WHERE parent_id = ?")
        .bind(comment_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM checklist_comments WHERE id = ? AND checklist_id = ?")
        .bind(comment_id)
        .bind(checklist_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "comment '{comment_id}' not found"
        )));
    }

    tx.commit().await?;
    Ok(())
}

pub fn definition_from_record(record: &FieldRecord) -> AppResult<FieldDefinition> {
    Ok(FieldDefinition {
        label: record.label.clone(),
        field_type: FieldType::parse(&record.field_type)?,
        is_required: record.is_required != 0,
        options: fields::parse_options_json(&record.options)?,
        min_length: record.min_length,
        max_length: record.max_length,
        min_value: record.min_value,
        max_value: record.max_value,
    })
}

pub fn parse_tags(raw: &str) -> AppResult<Vec<String>> {
    serde_json::from_str::<Vec<String>>(raw).map_err(|error| {
        tracing::error!(error = ?error, raw, "failed to parse stored checklist tags");
        AppError::Internal
    })
}

pub fn parse_conditional_logic(raw: &str) -> AppResult<Value> {
    serde_json::from_str::<Value>(raw).map_err(|error| {
        tracing::error!(error = ?error, raw, "failed to parse stored conditional logic");
        AppError::Internal
    })
}

pub fn parse_response_value(raw: &str) -> AppResult<Value> {
    serde_json::from_str::<Value>(raw).map_err(|error| {
        tracing::error!(error = ?error, raw, "failed to parse stored response value");
        AppError::Internal
    })
}

async fn template_summary_for(
    pool: &AnyPool,
    template: TemplateRecord,
) -> AppResult<TemplateSummary> {
    let fields_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM checklist_fields WHERE template_id = ?")
            .bind(&template.id)
            .fetch_one(pool)
            .await?;

    let checklists_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM checklists WHERE template_id = ?")
            .bind(&template.id)
            .fetch_one(pool)
            .await?;

    Ok(TemplateSummary {
        template,
        fields_count,
        checklists_count,
    })
}

async fn live_template_by_id(pool: &AnyPool, template_id: &str) -> AppResult<TemplateRecord> {
    let template = sqlx::query_as::<Any, TemplateRecord>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM checklist_templates WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(template_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("template '{template_id}' not found")))?;

    Ok(template)
}

async fn template_fields(pool: &AnyPool, template_id: &str) -> AppResult<Vec<FieldRecord>> {
    let fields = sqlx::query_as::<Any, FieldRecord>(&format!(
        r#"
        SELECT {FIELD_COLUMNS}
        FROM checklist_fields
        WHERE template_id = ?
        ORDER BY sort_order ASC, created_at ASC
        "#
    ))
    .bind(template_id)
    .fetch_all(pool)
    .await?;

    Ok(fields)
}

async fn template_field(
    pool: &AnyPool,
    template_id: &str,
    field_id: &str,
) -> AppResult<FieldRecord> {
    let field = sqlx::query_as::<Any, FieldRecord>(&format!(
        "SELECT {FIELD_COLUMNS} FROM checklist_fields WHERE id = ? AND template_id = ?"
    ))
    .bind(field_id)
    .bind(template_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("field '{field_id}' not found on this template")))?;

    Ok(field)
}

async fn checklist_by_id(pool: &AnyPool, checklist_id: &str) -> AppResult<ChecklistRecord> {
    let checklist = sqlx::query_as::<Any, ChecklistRecord>(&format!(
        "SELECT {CHECKLIST_COLUMNS} FROM checklists WHERE id = ?"
    ))
    .bind(checklist_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("checklist '{checklist_id}' not found")))?;

    Ok(checklist)
}

async fn checklist_responses(
    pool: &AnyPool,
    checklist_id: &str,
) -> AppResult<Vec<ChecklistResponseRecord>> {
    let responses = sqlx::query_as::<Any, ChecklistResponseRecord>(
        r#"
        SELECT
            r.id,
            r.checklist_id,
            r.field_id,
            f.label AS field_label,
            f.field_type,
            f.is_required,
            f.sort_order,
            r.value,
            r.is_completed,
            r.responded_by,
            r.responded_at,
            r.comments,
            r.created_at,
            r.updated_at
        FROM checklist_responses r
        INNER JOIN checklist_fields f ON f.id = r.field_id
        WHERE r.checklist_id = ?
        ORDER BY f.sort_order ASC, f.created_at ASC
        "#,
    )
    .bind(checklist_id)
    .fetch_all(pool)
    .await?;

    Ok(responses)
}

async fn insert_field_rows(
    tx: &mut sqlx::Transaction<'_, Any>,
    template_id: &str,
    inputs: &[NewFieldInput],
    base_order: i64,
    now: &str,
) -> AppResult<Vec<String>> {
    let mut created_ids = Vec::with_capacity(inputs.len());

    for (position, input) in inputs.iter().enumerate() {
        let label = input.label.trim().to_string();
        let sort_order = input.sort_order.unwrap_or(base_order + position as i64);
        let options_json = options_json(&label, &input.options)?;
        let logic_json = conditional_logic_json(&label, &input.conditional_logic)?;
        let field_id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO checklist_fields (
                id,
                template_id,
                label,
                field_type,
                help_text,
                placeholder,
                is_required,
                is_readonly,
                default_value,
                options,
                min_length,
                max_length,
                min_value,
                max_value,
                sort_order,
                conditional_logic,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&field_id)
        .bind(template_id)
        .bind(&label)
        .bind(&input.field_type)
        .bind(input.help_text.trim())
        .bind(input.placeholder.trim())
        .bind(i64::from(input.is_required))
        .bind(i64::from(input.is_readonly))
        .bind(&input.default_value)
        .bind(&options_json)
        .bind(input.min_length)
        .bind(input.max_length)
        .bind(input.min_value)
        .bind(input.max_value)
        .bind(sort_order)
        .bind(&logic_json)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        created_ids.push(field_id);
    }

    Ok(created_ids)
}

async fn recalculate_progress(
    tx: &mut sqlx::Transaction<'_, Any>,
    checklist_id: &str,
    now: &str,
) -> AppResult<()> {
    let total_fields: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM checklist_responses WHERE checklist_id = ?")
            .bind(checklist_id)
            .fetch_one(&mut **tx)
            .await?;

    let completed_fields: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM checklist_responses WHERE checklist_id = ? AND is_completed = 1",
    )
    .bind(checklist_id)
    .fetch_one(&mut **tx)
    .await?;

    let completion_percentage = if total_fields > 0 {
        round2(completed_fields as f64 / total_fields as f64 * 100.0)
    } else {
        0.0
    };

    sqlx::query(
        r#"
        UPDATE checklists
        SET total_fields = ?, completed_fields = ?, completion_percentage = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(total_fields)
    .bind(completed_fields)
    .bind(completion_percentage)
    .bind(now)
    .bind(checklist_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn recalculate_template_checklists(
    tx: &mut sqlx::Transaction<'_, Any>,
    template_id: &str,
    now: &str,
) -> AppResult<()> {
    let checklist_ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM checklists WHERE template_id = ?")
            .bind(template_id)
            .fetch_all(&mut **tx)
            .await?;

    for checklist_id in checklist_ids {
        recalculate_progress(tx, &checklist_id, now).await?;
    }

    Ok(())
}

async fn outstanding_required_count(
    tx: &mut sqlx::Transaction<'_, Any>,
    checklist_id: &str,
    template_id: &str,
) -> AppResult<i64> {
    // A required field added after instantiation has no response row; it still
    // counts as outstanding.
    let outstanding: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM checklist_fields f
        LEFT JOIN checklist_responses r ON r.field_id = f.id AND r.checklist_id = ?
        WHERE f.template_id = ? AND f.is_required = 1
          AND (r.id IS NULL OR r.is_completed = 0)
        "#,
    )
    .bind(checklist_id)
    .bind(template_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(outstanding)
}

fn ensure_editable(template: &TemplateRecord) -> AppResult<()> {
    if template.frozen_at.is_some() {
        return Err(AppError::FrozenTemplate(format!(
            "template '{}' is frozen",
            template.name
        )));
    }

    Ok(())
}

fn ensure_accepts_responses(checklist: &ChecklistRecord) -> AppResult<()> {
    if checklist.status == "completed" || checklist.status == "cancelled" {
        return Err(AppError::BadRequest(format!(
            "checklist '{}' is {} and no longer accepts responses",
            checklist.name, checklist.status
        )));
    }

    Ok(())
}

fn definition_from_input(input: &NewFieldInput) -> AppResult<FieldDefinition> {
    Ok(FieldDefinition {
        label: input.label.clone(),
        field_type: FieldType::parse(&input.field_type)?,
        is_required: input.is_required,
        options: input.options.clone(),
        min_length: input.min_length,
        max_length: input.max_length,
        min_value: input.min_value,
        max_value: input.max_value,
    })
}

fn options_json(label: &str, options: &[FieldOption]) -> AppResult<String> {
    serde_json::to_string(options).map_err(|error| {
        tracing::error!(error = ?error, label, "failed to serialize field options");
        AppError::Internal
    })
}

fn conditional_logic_json(label: &str, logic: &Option<Value>) -> AppResult<String> {
    match logic {
        None => Ok("{}".to_string()),
        Some(value) => {
            if !value.is_object() {
                return Err(AppError::BadRequest(format!(
                    "field '{label}' conditional_logic must be a JSON object"
                )));
            }

            serde_json::to_string(value).map_err(|error| {
                tracing::error!(error = ?error, label, "failed to serialize conditional logic");
                AppError::Internal
            })
        }
    }
}

fn tags_json(tags: Vec<String>) -> AppResult<String> {
    serde_json::to_string(&tags).map_err(|error| {
        tracing::error!(error = ?error, "failed to serialize checklist tags");
        AppError::Internal
    })
}

fn normalized_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        seen.insert(trimmed.to_string());
    }

    seen.into_iter().collect()
}

fn normalize_due_date(value: &str) -> AppResult<String> {
    let parsed = DateTime::parse_from_rfc3339(value.trim()).map_err(|_| {
        AppError::BadRequest("due_date must be an RFC 3339 datetime".to_string())
    })?;

    Ok(parsed
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn validate_status(value: &str) -> AppResult<()> {
    match value {
        "draft" | "in_progress" | "completed" | "cancelled" | "on_hold" => Ok(()),
        _ => Err(AppError::BadRequest(format!(
            "invalid checklist status '{value}'"
        ))),
    }
}

fn validate_priority(value: &str) -> AppResult<()> {
    match value {
        "low" | "medium" | "high" | "urgent" => Ok(()),
        _ => Err(AppError::BadRequest(format!(
            "invalid checklist priority '{value}'"
        ))),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
