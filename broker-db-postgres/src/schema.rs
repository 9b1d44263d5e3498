table! {
    service_instances (id) {
        id -> Varchar,
        instance_type -> Varchar,
        domain_names -> Text,
        deactivated_at -> Nullable<Timestamptz>,
        current_certificate_id -> Nullable<BigInt>,
        new_certificate_id -> Nullable<BigInt>,
        payload -> Jsonb,
    }
}

table! {
    certificates (id) {
        id -> BigInt,
        service_instance_id -> Varchar,
        private_key_pem -> Nullable<Text>,
        leaf_pem -> Nullable<Text>,
        fullchain_pem -> Nullable<Text>,
        iam_server_certificate_id -> Nullable<Varchar>,
        iam_server_certificate_arn -> Nullable<Varchar>,
        csr_pem -> Nullable<Text>,
        order_json -> Nullable<Text>,
        challenges -> Jsonb,
    }
}

table! {
    operations (id) {
        id -> BigInt,
        service_instance_id -> Varchar,
        action -> Varchar,
        state -> Varchar,
        step_description -> Text,
        created_at -> Timestamptz,
    }
}

allow_tables_to_appear_in_same_query!(service_instances, certificates, operations,);
