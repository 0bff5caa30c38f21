//! # Organization Provisioning & Bootstrap
//!
//! A new organization always comes with its system administrator role
//! (granting `*`) and a first administrator user. The same path serves
//! `POST /v1/organizations` and the first start of an empty deployment,
//! where `BOOTSTRAP_ADMIN_EMAIL` / `BOOTSTRAP_ADMIN_PASSWORD` create the
//! platform organization and its platform administrator.

use chrono::Utc;
use obra_core::{Cuit, Email, OrganizationId, Permission, RoleId, UserId, ValidationError};
use serde_json::json;

use crate::audit::AuditEvent;
use crate::auth::{hash_password_blocking, MIN_PASSWORD_LEN};
use crate::db::Changes;
use crate::error::AppError;
use crate::state::{AppState, Organization, Role, User, UserView, WriteTx};

/// Name of the role every organization starts with.
pub const ADMIN_ROLE_NAME: &str = "Administrador";

/// Validated input for a new organization and its first administrator.
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub cuit: Cuit,
    pub withholding_agent: bool,
    pub perception_agent: bool,
    pub admin_email: Email,
    pub admin_display_name: String,
    /// Argon2 PHC string of the administrator's password.
    pub admin_password_hash: String,
    pub platform_admin: bool,
}

/// What provisioning created.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub organization: Organization,
    pub role: Role,
    pub user: User,
}

/// Create an organization, its system role and its first administrator.
///
/// Fails with `DUPLICATE` when the CUIT or the administrator email is taken.
pub fn provision_organization(
    state: &WriteTx<'_>,
    input: NewOrganization,
    actor: Option<UserId>,
) -> Result<(Provisioned, Changes), AppError> {
    let now = Utc::now();

    if state.organizations.any(|o| o.cuit == input.cuit) {
        return Err(AppError::rule(
            "DUPLICATE",
            format!("an organization with CUIT {} already exists", input.cuit.formatted()),
        ));
    }
    if state.users.any(|u| u.email == input.admin_email) {
        return Err(AppError::rule(
            "DUPLICATE",
            format!("a user with email {} already exists", input.admin_email.as_str()),
        ));
    }

    let organization = Organization {
        id: OrganizationId::new(),
        name: input.name,
        cuit: input.cuit,
        withholding_agent: input.withholding_agent,
        perception_agent: input.perception_agent,
        active: true,
        created_at: now,
        updated_at: now,
    };
    let role = Role {
        id: RoleId::new(),
        organization_id: organization.id,
        name: ADMIN_ROLE_NAME.to_string(),
        permissions: vec![Permission::new(Permission::ALL)?],
        system: true,
        created_at: now,
        updated_at: now,
    };
    let user = User {
        id: UserId::new(),
        organization_id: organization.id,
        email: input.admin_email,
        display_name: input.admin_display_name,
        password_hash: input.admin_password_hash,
        role_id: role.id,
        active: true,
        platform_admin: input.platform_admin,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };

    let mut changes = Changes::new();
    changes.put(&organization)?.put(&role)?.put(&user)?;

    state.organizations.put(organization.clone());
    state.roles.put(role.clone());
    state.users.put(user.clone());

    changes.audit(state.record_audit(
        organization.id,
        AuditEvent::new(
            actor,
            "organization.created",
            "organization",
            *organization.id.as_uuid(),
        )
        .with_metadata(json!({
            "name": organization.name,
            "cuit": organization.cuit,
            "admin_user_id": user.id,
        })),
    ));

    tracing::info!(
        organization_id = %organization.id,
        admin_user_id = %user.id,
        "organization provisioned"
    );

    Ok((
        Provisioned {
            organization,
            role,
            user,
        },
        changes,
    ))
}

/// Errors creating the bootstrap administrator.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Bootstrap credentials are malformed.
    #[error("invalid bootstrap configuration: {0}")]
    Invalid(#[from] ValidationError),
    /// Provisioning or persistence failed.
    #[error("bootstrap failed: {0}")]
    Failed(#[from] AppError),
}

/// Create the platform organization and administrator when no user exists.
///
/// Returns the created administrator, or `None` when users already exist or
/// no bootstrap credentials are configured.
pub async fn bootstrap_admin(state: &AppState) -> Result<Option<UserView>, BootstrapError> {
    if !state.users.is_empty() {
        return Ok(None);
    }
    let Some(config) = state.config.bootstrap.clone() else {
        tracing::warn!(
            "no users exist and BOOTSTRAP_ADMIN_EMAIL / BOOTSTRAP_ADMIN_PASSWORD are not set; nobody can log in"
        );
        return Ok(None);
    };
    if config.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::field(
            "BOOTSTRAP_ADMIN_PASSWORD",
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        )
        .into());
    }

    let input = NewOrganization {
        name: config.org_name,
        cuit: Cuit::new(&config.org_cuit)?,
        withholding_agent: true,
        perception_agent: true,
        admin_email: Email::new(&config.email)?,
        admin_display_name: "Administrador".to_string(),
        admin_password_hash: hash_password_blocking(config.password, state.config.password_cost)
            .await?,
        platform_admin: true,
    };
    let tx = state.begin().await;
    let (provisioned, changes) = provision_organization(&tx, input, None)?;
    tx.commit(changes).await?;

    tracing::info!(
        email = provisioned.user.email.as_str(),
        organization_id = %provisioned.organization.id,
        "bootstrap administrator created"
    );
    Ok(Some(UserView::from(&provisioned.user)))
}
