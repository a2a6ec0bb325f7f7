use super::{Database, StoreError};
use model::{service::Service, token_policy::TokenPolicy};
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct ServiceRow {
    service_id: i64,
    service_global_id: String,
    display_name: String,
    token_policy_type: String,
    token_policy_config: String,
}

impl ServiceRow {
    fn into_service(self) -> Result<Service, StoreError> {
        let global_id = self
            .service_global_id
            .parse::<Uuid>()
            .map_err(|err| StoreError::Decode(format!("service global id: {}", err)))?;
        let token_policy =
            TokenPolicy::unmarshal_config(&self.token_policy_type, &self.token_policy_config)
                .map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok(Service {
            service_id: self.service_id,
            global_id,
            display_name: self.display_name,
            token_policy,
        })
    }
}

impl Database {
    pub async fn create_service(
        &self,
        global_id: Uuid,
        display_name: &str,
        token_policy: &TokenPolicy,
    ) -> Result<Service, StoreError> {
        const QUERY: &str = "\
            INSERT INTO services (service_global_id, display_name, token_policy_type, token_policy_config) \
            VALUES ($1, $2, $3, $4) \
            RETURNING *;";
        let row: ServiceRow = sqlx::query_as(QUERY)
            .bind(global_id.to_string())
            .bind(display_name)
            .bind(token_policy.policy_type())
            .bind(token_policy.marshal_config())
            .fetch_one(&self.pool)
            .await?;
        row.into_service()
    }

    pub async fn remove_service(&self, service_id: i64) -> Result<Service, StoreError> {
        let row: ServiceRow = sqlx::query_as("DELETE FROM services WHERE service_id = $1 RETURNING *;")
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        row.into_service()
    }

    pub async fn get_service(&self, service_id: i64) -> Result<Service, StoreError> {
        let row: ServiceRow = sqlx::query_as("SELECT * FROM services WHERE service_id = $1;")
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        row.into_service()
    }

    pub async fn find_service_by_global_id(&self, global_id: Uuid) -> Result<Service, StoreError> {
        let row: ServiceRow = sqlx::query_as("SELECT * FROM services WHERE service_global_id = $1;")
            .bind(global_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        row.into_service()
    }

    pub async fn list_services(
        &self,
        start_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Service>, StoreError> {
        const QUERY: &str = "\
            SELECT * FROM services WHERE service_id >= $1 \
            ORDER BY service_id ASC \
            LIMIT $2 OFFSET $3;";
        let rows: Vec<ServiceRow> = sqlx::query_as(QUERY)
            .bind(start_id)
            .bind(limit)
            .bind(skip)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ServiceRow::into_service).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn postgres_service_roundtrip() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();

        let global_id = Uuid::new_v4();
        let created = db
            .create_service(global_id, "sample service", &TokenPolicy::product(7))
            .await
            .unwrap();
        assert_eq!(created.token_policy, TokenPolicy::product(7));

        let by_id = db.get_service(created.service_id).await.unwrap();
        assert_eq!(by_id, created);
        let by_global_id = db.find_service_by_global_id(global_id).await.unwrap();
        assert_eq!(by_global_id, created);

        // The global id is unique.
        assert!(matches!(
            db.create_service(global_id, "impostor", &TokenPolicy::product(1)).await,
            Err(StoreError::Duplicate)
        ));

        db.remove_service(created.service_id).await.unwrap();
        assert!(matches!(
            db.get_service(created.service_id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_list_services_pages_by_id() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let service = db
                .create_service(Uuid::new_v4(), &format!("service {}", i), &TokenPolicy::product(1))
                .await
                .unwrap();
            ids.push(service.service_id);
        }

        let page = db.list_services(ids[1], 0, 2).await.unwrap();
        assert_eq!(
            page.iter().map(|s| s.service_id).collect::<Vec<_>>(),
            &ids[1..3]
        );
        let rest = db.list_services(ids[3], 0, 50).await.unwrap();
        assert_eq!(
            rest.iter().map(|s| s.service_id).collect::<Vec<_>>(),
            &ids[3..]
        );
    }
}
