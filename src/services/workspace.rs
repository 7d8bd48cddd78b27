//! Workspace resolution for workspace-scoped routes.

use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::workspace::Workspace;

/// Resolve a workspace by name for reading.
pub async fn resolve(pool: &PgPool, name: &str) -> Result<Workspace, AppError> {
    let workspace = sqlx::query_as::<_, Workspace>(
        "SELECT id, name, description, active, readonly, created_at \
         FROM workspaces WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Workspace not found: {name}")))?;

    check_active(&workspace)?;
    Ok(workspace)
}

/// Resolve a workspace by name for writing.
pub async fn resolve_writable(pool: &PgPool, name: &str) -> Result<Workspace, AppError> {
    let workspace = resolve(pool, name).await?;
    check_writable(&workspace)?;
    Ok(workspace)
}

fn check_active(workspace: &Workspace) -> Result<(), AppError> {
    if !workspace.active {
        return Err(AppError::Forbidden(format!(
            "Workspace {} is disabled",
            workspace.name
        )));
    }
    Ok(())
}

fn check_writable(workspace: &Workspace) -> Result<(), AppError> {
    if workspace.readonly {
        return Err(AppError::Forbidden(format!(
            "Workspace {} is read-only",
            workspace.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn workspace(active: bool, readonly: bool) -> Workspace {
        Workspace {
            id: 1,
            name: "acme".to_string(),
            description: String::new(),
            active,
            readonly,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn inactive_workspaces_are_forbidden() {
        assert!(check_active(&workspace(true, false)).is_ok());
        assert!(matches!(
            check_active(&workspace(false, false)),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn readonly_workspaces_reject_writes() {
        assert!(check_writable(&workspace(true, false)).is_ok());
        assert!(matches!(
            check_writable(&workspace(true, true)),
            Err(AppError::Forbidden(_))
        ));
    }
}
