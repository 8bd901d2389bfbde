use chrono::Utc;
use sqlx::Row;

use expensa_core::domain::user::{CompanyId, User, UserId, UserRole};

use super::{decode_error, parse_enum, DirectoryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlDirectoryRepository {
    pool: DbPool,
}

impl SqlDirectoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let company_id: String = row.try_get("company_id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let email: String = row.try_get("email").map_err(decode_error)?;
    let role: String = row.try_get("role").map_err(decode_error)?;
    let manager_id: Option<String> = row.try_get("manager_id").map_err(decode_error)?;
    let active: bool = row.try_get("active").map_err(decode_error)?;

    Ok(User {
        id: UserId(id),
        company_id: CompanyId(company_id),
        name,
        email,
        role: parse_enum::<UserRole>(&role)?,
        manager_id: manager_id.map(UserId),
        active,
    })
}

#[async_trait::async_trait]
impl DirectoryRepository for SqlDirectoryRepository {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, company_id, name, email, role, manager_id, active
             FROM users WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn save_company(
        &self,
        id: &CompanyId,
        name: &str,
        currency: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO companies (id, name, currency, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 currency = excluded.currency",
        )
        .bind(&id.0)
        .bind(name)
        .bind(currency)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_user(&self, user: User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, company_id, name, email, role, manager_id, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 role = excluded.role,
                 manager_id = excluded.manager_id,
                 active = excluded.active",
        )
        .bind(&user.id.0)
        .bind(&user.company_id.0)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.manager_id.as_ref().map(|id| id.0.as_str()))
        .bind(user.active)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use expensa_core::domain::user::{CompanyId, User, UserId, UserRole};

    use super::SqlDirectoryRepository;
    use crate::repositories::DirectoryRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn user(id: &str, manager: Option<&str>) -> User {
        User {
            id: UserId(id.to_string()),
            company_id: CompanyId("acme".to_string()),
            name: format!("User {id}"),
            email: format!("{id}@acme.test"),
            role: UserRole::Employee,
            manager_id: manager.map(|id| UserId(id.to_string())),
            active: true,
        }
    }

    #[tokio::test]
    async fn saves_and_finds_users_with_manager() {
        let pool = setup().await;
        let repo = SqlDirectoryRepository::new(pool);
        repo.save_company(&CompanyId("acme".to_string()), "Acme", "USD").await.expect("company");

        let mut manager = user("u-mgr", None);
        manager.role = UserRole::Manager;
        repo.save_user(manager).await.expect("save manager");
        repo.save_user(user("u-emp", Some("u-mgr"))).await.expect("save employee");

        let found = repo
            .find_user(&UserId("u-emp".to_string()))
            .await
            .expect("find")
            .expect("user exists");
        assert_eq!(found.manager_id, Some(UserId("u-mgr".to_string())));
        assert_eq!(found.as_submitter().company_id, CompanyId("acme".to_string()));

        let missing = repo.find_user(&UserId("u-ghost".to_string())).await.expect("find");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn save_user_updates_existing_row() {
        let pool = setup().await;
        let repo = SqlDirectoryRepository::new(pool);
        repo.save_company(&CompanyId("acme".to_string()), "Acme", "USD").await.expect("company");

        let mut emp = user("u-emp", None);
        repo.save_user(emp.clone()).await.expect("insert");
        emp.active = false;
        emp.role = UserRole::Manager;
        repo.save_user(emp).await.expect("update");

        let found = repo
            .find_user(&UserId("u-emp".to_string()))
            .await
            .expect("find")
            .expect("user exists");
        assert!(!found.active);
        assert_eq!(found.role, UserRole::Manager);
    }
}
