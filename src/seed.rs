use sqlx::AnyPool;

use crate::db::queries::{self, NewFieldInput, NewTemplateInput};
use crate::error::AppResult;
use crate::fields::FieldOption;

pub async fn seed_default_templates(pool: &AnyPool, actor: &str) -> AppResult<()> {
    for input in default_templates(actor) {
        if let Some(existing) = queries::find_template_by_name(pool, &input.name).await? {
            tracing::info!(
                template_id = %existing.id,
                name = %existing.name,
                "seed template already present, skipping"
            );
            continue;
        }

        let details = queries::create_template(pool, input).await?;
        tracing::info!(
            template_id = %details.template.id,
            name = %details.template.name,
            fields = details.fields.len(),
            "seeded default template"
        );
    }

    Ok(())
}

fn default_templates(actor: &str) -> Vec<NewTemplateInput> {
    vec![
        financial_audit(actor),
        it_security_audit(actor),
        regulatory_compliance_audit(actor),
        operational_efficiency_audit(actor),
    ]
}

fn financial_audit(actor: &str) -> NewTemplateInput {
    NewTemplateInput {
        name: "Financial Audit Checklist".to_string(),
        description: "Comprehensive financial audit checklist covering all major financial controls and compliance requirements.".to_string(),
        category: "Financial".to_string(),
        is_active: true,
        fields: vec![
            field(
                "Audit Period Start Date",
                "date",
                "Select the start date of the audit period",
                true,
            ),
            choice_field(
                "Revenue Recognition Compliance",
                "radio",
                &["Fully Compliant", "Minor Issues", "Major Issues", "Non-Compliant"],
                true,
            ),
            field(
                "Cash Reconciliation Complete",
                "checkbox",
                "Check if all cash accounts are properly reconciled",
                true,
            ),
            field(
                "Accounts Receivable Balance ($)",
                "number",
                "Enter the total accounts receivable balance",
                true,
            ),
            choice_field(
                "Inventory Valuation Method",
                "select",
                &["FIFO", "LIFO", "Weighted Average", "Specific Identification"],
                true,
            ),
            rating_field(
                "Internal Controls Effectiveness (1-5)",
                "Rate the effectiveness of financial internal controls",
            ),
            field(
                "Supporting Financial Documents",
                "file",
                "Upload relevant financial statements and supporting documents",
                false,
            ),
            field(
                "Key Audit Findings",
                "textarea",
                "Describe any significant findings or concerns",
                false,
            ),
        ],
        created_by: actor.to_string(),
    }
}

fn it_security_audit(actor: &str) -> NewTemplateInput {
    NewTemplateInput {
        name: "IT Security Audit Checklist".to_string(),
        description: "Comprehensive IT security audit covering cybersecurity controls, data protection, and compliance.".to_string(),
        category: "IT Security".to_string(),
        is_active: true,
        fields: vec![
            field(
                "Security Policies Reviewed and Updated",
                "checkbox",
                "Check if security policies have been reviewed and updated",
                true,
            ),
            rating_field(
                "Access Control Effectiveness (1-5)",
                "Rate the effectiveness of user access controls",
            ),
            choice_field(
                "Password Policy Compliance",
                "radio",
                &["Fully Compliant", "Partially Compliant", "Non-Compliant"],
                true,
            ),
            choice_field(
                "Data Backup Frequency",
                "select",
                &["Daily", "Weekly", "Monthly", "Irregular", "No Backups"],
                true,
            ),
            field(
                "Last Vulnerability Scan Date",
                "date",
                "Enter the date of the last vulnerability scan",
                true,
            ),
            field(
                "Security Incidents (Last 12 Months)",
                "number",
                "Number of security incidents in the past year",
                true,
            ),
            field(
                "Compliance Certificates",
                "file",
                "Upload relevant security compliance certificates",
                false,
            ),
            field(
                "Security Recommendations",
                "textarea",
                "List recommended security improvements",
                false,
            ),
        ],
        created_by: actor.to_string(),
    }
}

fn regulatory_compliance_audit(actor: &str) -> NewTemplateInput {
    NewTemplateInput {
        name: "Regulatory Compliance Audit".to_string(),
        description: "General regulatory compliance audit template for various industry standards and regulations.".to_string(),
        category: "Compliance".to_string(),
        is_active: true,
        fields: vec![
            choice_field(
                "Primary Regulation/Standard",
                "select",
                &["SOX", "GDPR", "HIPAA", "PCI-DSS", "ISO 27001", "Other"],
                true,
            ),
            field(
                "Compliance Officer Name",
                "text",
                "Enter the name of the compliance officer",
                true,
            ),
            field(
                "Previous Audit Date",
                "date",
                "Enter the date of the previous audit",
                false,
            ),
            rating_field(
                "Policy Adherence Level (1-5)",
                "Rate overall adherence to compliance policies",
            ),
            field(
                "Staff Compliance Training Completed",
                "checkbox",
                "Check if staff compliance training has been completed",
                true,
            ),
            choice_field(
                "Documentation Quality",
                "radio",
                &["Excellent", "Good", "Fair", "Poor"],
                true,
            ),
            field(
                "Compliance Evidence",
                "file",
                "Upload supporting compliance documentation",
                false,
            ),
            field(
                "Compliance Action Items",
                "textarea",
                "List required actions to maintain or improve compliance",
                false,
            ),
        ],
        created_by: actor.to_string(),
    }
}

fn operational_efficiency_audit(actor: &str) -> NewTemplateInput {
    NewTemplateInput {
        name: "Operational Efficiency Audit".to_string(),
        description: "Operational audit template focusing on process efficiency, resource utilization, and performance metrics.".to_string(),
        category: "Operations".to_string(),
        is_active: true,
        fields: vec![
            field(
                "Department/Process Being Audited",
                "text",
                "Enter the name of the department or process being audited",
                true,
            ),
            rating_field(
                "Process Efficiency Rating (1-5)",
                "Rate the overall efficiency of the process",
            ),
            field(
                "Resource Utilization (%)",
                "number",
                "Enter percentage of resource utilization",
                true,
            ),
            field(
                "KPI Targets Met",
                "checkbox",
                "Check if key performance indicators are meeting targets",
                true,
            ),
            choice_field(
                "Process Documentation Status",
                "radio",
                &["Complete and Current", "Partially Complete", "Outdated", "Missing"],
                true,
            ),
            choice_field(
                "Automation Opportunities",
                "select",
                &["High Potential", "Medium Potential", "Low Potential", "Already Automated"],
                true,
            ),
            field(
                "Process Documentation",
                "file",
                "Upload current process documentation or flowchart",
                false,
            ),
            field(
                "Process Improvement Recommendations",
                "textarea",
                "Recommend specific improvements for operational efficiency",
                false,
            ),
        ],
        created_by: actor.to_string(),
    }
}

fn field(label: &str, field_type: &str, help_text: &str, required: bool) -> NewFieldInput {
    NewFieldInput {
        label: label.to_string(),
        field_type: field_type.to_string(),
        help_text: help_text.to_string(),
        placeholder: String::new(),
        is_required: required,
        is_readonly: false,
        default_value: String::new(),
        options: Vec::new(),
        min_length: None,
        max_length: None,
        min_value: None,
        max_value: None,
        sort_order: None,
        conditional_logic: None,
    }
}

fn choice_field(
    label: &str,
    field_type: &str,
    choices: &[&str],
    required: bool,
) -> NewFieldInput {
    NewFieldInput {
        options: choices
            .iter()
            .map(|choice| FieldOption {
                value: choice.to_string(),
                label: choice.to_string(),
            })
            .collect(),
        ..field(label, field_type, "", required)
    }
}

fn rating_field(label: &str, help_text: &str) -> NewFieldInput {
    NewFieldInput {
        min_value: Some(1.0),
        max_value: Some(5.0),
        ..field(label, "rating", help_text, true)
    }
}
