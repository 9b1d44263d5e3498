#[derive(Debug, Clone, Copy)]
pub struct CreateCertificate {
    pub id: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateOperation {
    pub id: i64,
}
