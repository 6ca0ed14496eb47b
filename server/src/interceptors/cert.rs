use jobexec::types::Owner;
use tonic::{Request, Status};
use x509_parser::{certificate::X509Certificate, traits::FromDer};

/// A tonic interceptor service function.
///
/// Extracts the organization attribute from the client certificate's
/// subject and adds it to the request extensions as the caller identity.
/// Requests without a usable identity never reach the job service.
pub fn require_peer_identity(mut req: Request<()>) -> Result<Request<()>, Status> {
    // extract the client certs
    let client_certs = req
        .peer_certs()
        .ok_or_else(|| Status::unauthenticated("Request missing client cert"))?;
    if client_certs.is_empty() {
        return Err(Status::unauthenticated("Request missing client cert"));
    }

    // rustls hands the chain over DER encoded
    let der = client_certs[0].get_ref();
    let (rem, cert) =
        X509Certificate::from_der(der).map_err(|_| Status::unauthenticated("Bad client cert"))?;
    if !rem.is_empty() {
        return Err(Status::unauthenticated("Bad client cert"));
    }

    let org = cert
        .subject()
        .iter_organization()
        .next()
        .ok_or_else(|| Status::unauthenticated("Client cert missing subject organization"))?;
    let user_id = match org.attr_value().content {
        x509_parser::der_parser::ber::BerObjectContent::UTF8String(user) => String::from(user),
        _ => return Err(Status::unauthenticated("Client cert organization must be UTF8")),
    };
    if user_id.is_empty() {
        return Err(Status::unauthenticated("Client cert organization is empty"));
    }

    req.extensions_mut().insert(UserExtension { user_id });
    Ok(req)
}

/// Caller identity carried through request extensions; the interceptor is
/// the only producer.
pub struct UserExtension {
    pub user_id: Owner,
}
