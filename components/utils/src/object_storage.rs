use opendal::Operator;

/// All chunk backends speak through an opendal [Operator]; the concrete
/// service behind it is chosen at configuration time.
pub type ObjectStorage = Operator;

pub fn new_fs_store(path: &str) -> Result<ObjectStorage, opendal::Error> {
    let mut builder = opendal::services::Fs::default();
    builder.root(path);
    let op = Operator::new(builder)?.finish();
    Ok(op)
}

pub fn new_memory_store(root: &str) -> Result<ObjectStorage, opendal::Error> {
    let mut builder = opendal::services::Memory::default();
    builder.root(root);
    let op = Operator::new(builder)?.finish();
    Ok(op)
}

pub fn new_webdav_store(
    url: &str,
    username: &str,
    password: &str,
) -> Result<ObjectStorage, opendal::Error> {
    let mut builder = opendal::services::Webdav::default();
    builder.endpoint(url);
    if !username.is_empty() {
        builder.username(username);
    }
    if !password.is_empty() {
        builder.password(password);
    }
    let op = Operator::new(builder)?.finish();
    Ok(op)
}

#[allow(clippy::too_many_arguments)]
pub fn new_s3_store(
    endpoint: &str,
    access_key: &str,
    secret_key: &str,
    bucket: &str,
    use_ssl: bool,
    region: Option<&str>,
) -> Result<ObjectStorage, opendal::Error> {
    // The endpoint may come without a scheme; use_ssl decides it then.
    let endpoint = if endpoint.contains("://") {
        endpoint.to_string()
    } else if use_ssl {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    };

    let mut builder = opendal::services::S3::default();
    builder.endpoint(&endpoint);
    builder.bucket(bucket);
    builder.access_key_id(access_key);
    builder.secret_access_key(secret_key);
    builder.region(region.unwrap_or("us-east-1"));
    let op = Operator::new(builder)?.finish();
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let op = new_fs_store(dir.path().to_str().unwrap()).unwrap();
        op.write("a/b.chunk", vec![1u8, 2, 3]).await.unwrap();
        let got = op.read("a/b.chunk").await.unwrap();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let op = new_memory_store("/").unwrap();
        op.write("x", vec![9u8]).await.unwrap();
        assert_eq!(op.read("x").await.unwrap(), vec![9]);
    }
}
